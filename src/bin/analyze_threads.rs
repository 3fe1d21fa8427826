use std::collections::BTreeMap;
use std::path::PathBuf;

use mailthreads::config::Config;
use mailthreads::mail::load_threads;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Config::load().output_path());

    let threads = load_threads(&path)?;
    let total_messages: usize = threads.iter().map(|t| t.total_messages).sum();

    println!("Threads in {}:", path.display());
    println!("  Total messages: {}", total_messages);
    println!("  Threads: {}", threads.len());

    let sizes: Vec<usize> = threads.iter().map(|t| t.total_messages).collect();
    let count = |lo: usize, hi: usize| sizes.iter().filter(|&&s| s >= lo && s <= hi).count();

    println!("\nThread size distribution:");
    println!("  Single message threads: {}", count(1, 1));
    println!("  2-5 messages: {}", count(2, 5));
    println!("  6-10 messages: {}", count(6, 10));
    println!("  11-50 messages: {}", count(11, 50));
    println!("  50+ messages: {}", count(51, usize::MAX));

    let mut largest: Vec<_> = threads.iter().collect();
    largest.sort_by(|a, b| b.total_messages.cmp(&a.total_messages));

    println!("\nTop 20 largest threads:");
    for (i, thread) in largest.iter().take(20).enumerate() {
        let subject = match thread.subject() {
            "" => "(no subject)",
            s => s,
        };
        let truncated: String = subject.chars().take(50).collect();
        println!("  {:2}. {:4} msgs - {}", i + 1, thread.total_messages, truncated);
    }

    let mut labels: BTreeMap<&str, usize> = BTreeMap::new();
    for thread in &threads {
        for label in &thread.labels {
            *labels.entry(label.as_str()).or_default() += 1;
        }
    }
    println!("\nThreads per label:");
    for (label, n) in labels {
        println!("  {:<20} {}", label, n);
    }

    // Sanity checks on the ordering guarantees
    println!("\n--- Checking for issues ---");
    let unsorted_threads = threads
        .iter()
        .filter(|t| {
            t.messages
                .windows(2)
                .any(|w| w[0].timestamp > w[1].timestamp)
        })
        .count();
    println!("Threads with out-of-order messages: {}", unsorted_threads);

    let misordered = threads
        .windows(2)
        .filter(|w| w[0].last_activity() < w[1].last_activity())
        .count();
    println!("Thread pairs out of recency order: {}", misordered);

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for message in threads.iter().flat_map(|t| &t.messages) {
        *seen.entry(message.message_id.as_str()).or_default() += 1;
    }
    let duplicates = seen.values().filter(|&&n| n > 1).count();
    println!("Message ids in more than one thread: {}", duplicates);

    Ok(())
}
