use std::collections::{BTreeSet, HashMap, HashSet};

use uuid::Uuid;

use super::types::{MessageRecord, ThreadRecord};

/// Reply/reference edges between message ids: parent id -> ids of the
/// messages that reply to or reference it. Built once, then read-only.
#[derive(Debug, Default)]
pub struct ThreadGraph {
    children: HashMap<String, Vec<String>>,
}

impl ThreadGraph {
    /// Build the graph over all records that carry a message id.
    ///
    /// `references` usually repeats the whole ancestor chain, so the same
    /// child shows up under several ancestors. That is expected; duplicate
    /// parent -> child edges are only stored once.
    pub fn build(records: &[MessageRecord]) -> Self {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();

        let mut add_edge = |parent: &str, child: &str| {
            if parent.is_empty() {
                return;
            }
            let kids = children.entry(parent.to_string()).or_default();
            if !kids.iter().any(|k| k == child) {
                kids.push(child.to_string());
            }
        };

        for record in records.iter().filter(|r| r.has_id()) {
            add_edge(&record.in_reply_to, &record.message_id);
            for reference in &record.references {
                add_edge(reference, &record.message_id);
            }
        }

        Self { children }
    }

    /// Ids that reply to or reference `id`, in the order they were seen
    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }
}

/// Follow `in_reply_to` upwards while the parent is known. Stops on a
/// missing parent or the first id seen twice, so reply cycles terminate.
fn resolve_root<'a>(start: &'a str, lookup: &HashMap<&'a str, &'a MessageRecord>) -> &'a str {
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut current = start;

    while let Some(&record) = lookup.get(current) {
        let parent = record.in_reply_to.as_str();
        if parent.is_empty() || !lookup.contains_key(parent) || !visited.insert(parent) {
            break;
        }
        current = parent;
    }

    current
}

/// Depth-first walk from `root`, collecting every reachable message that is
/// not already part of an earlier thread. Iterative, so deep or wide
/// threads cannot overflow the stack.
fn collect_thread<'a>(
    root: &'a str,
    graph: &'a ThreadGraph,
    lookup: &HashMap<&'a str, &'a MessageRecord>,
    assigned: &HashSet<&'a str>,
) -> Vec<&'a MessageRecord> {
    let mut collected = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![root];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        // Ids referenced but never fetched are not part of any thread, and
        // neither is anything reachable only through them
        let Some(&record) = lookup.get(id) else {
            continue;
        };
        if assigned.contains(id) {
            continue;
        }
        collected.push(record);

        // Reverse so children are visited in the order they were recorded
        for child in graph.children(id).iter().rev() {
            if !visited.contains(child.as_str()) {
                stack.push(child.as_str());
            }
        }
    }

    collected
}

/// Group records into threads.
///
/// Every record with a message id ends up in exactly one thread; records
/// without one are ignored. When two records share an id the first one wins.
/// Messages inside a thread are in ascending timestamp order and threads are
/// ordered by their latest message, newest first. Apart from the generated
/// `thread_id`s the result depends only on the input records and their order.
pub fn assemble_threads(records: &[MessageRecord], graph: &ThreadGraph) -> Vec<ThreadRecord> {
    let mut lookup: HashMap<&str, &MessageRecord> = HashMap::new();
    for record in records.iter().filter(|r| r.has_id()) {
        if lookup.contains_key(record.message_id.as_str()) {
            tracing::debug!(
                message = %record.message_id,
                folder = %record.folder,
                "duplicate message id, keeping first"
            );
            continue;
        }
        lookup.insert(&record.message_id, record);
    }

    let mut assigned: HashSet<&str> = HashSet::new();
    let mut threads = Vec::new();

    for record in records.iter().filter(|r| r.has_id()) {
        if assigned.contains(record.message_id.as_str()) {
            continue;
        }

        let root = resolve_root(&record.message_id, &lookup);
        let mut messages = collect_thread(root, graph, &lookup, &assigned);
        if messages.is_empty() {
            continue;
        }

        // Stable sort, ties keep traversal order
        messages.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        assigned.extend(messages.iter().map(|&m| m.message_id.as_str()));

        let labels: BTreeSet<String> = messages
            .iter()
            .flat_map(|m| m.labels.iter().cloned())
            .collect();
        let reply_to_message_id = messages
            .last()
            .map(|m| m.message_id.clone())
            .unwrap_or_default();

        threads.push(ThreadRecord {
            thread_id: Uuid::new_v4().to_string(),
            total_messages: messages.len(),
            labels,
            reply_to_message_id,
            messages: messages.into_iter().cloned().collect(),
        });
    }

    // Most recent conversation first
    threads.sort_by(|a, b| b.last_activity().total_cmp(&a.last_activity()));
    threads
}

/// Build the reply graph and assemble threads in one go.
pub fn build_threads(records: &[MessageRecord]) -> Vec<ThreadRecord> {
    let graph = ThreadGraph::build(records);
    tracing::debug!(edges = graph.edge_count(), "built reply graph");
    assemble_threads(records, &graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, reply_to: &str, refs: &[&str], ts: f64) -> MessageRecord {
        MessageRecord {
            message_id: id.to_string(),
            datetime: String::new(),
            timestamp: ts,
            sender: "a@example.com".to_string(),
            receiver: "b@example.com".to_string(),
            subject: format!("subject {}", id),
            body: String::new(),
            references: refs.iter().map(|r| r.to_string()).collect(),
            in_reply_to: reply_to.to_string(),
            labels: BTreeSet::new(),
            folder: "INBOX".to_string(),
        }
    }

    fn with_labels(mut record: MessageRecord, labels: &[&str]) -> MessageRecord {
        record.labels = labels.iter().map(|l| l.to_string()).collect();
        record
    }

    fn ids(thread: &ThreadRecord) -> Vec<&str> {
        thread
            .messages
            .iter()
            .map(|m| m.message_id.as_str())
            .collect()
    }

    fn groupings(threads: &[ThreadRecord]) -> Vec<Vec<&str>> {
        threads.iter().map(ids).collect()
    }

    #[test]
    fn test_graph_edges() {
        let records = vec![
            msg("m1", "", &[], 1.0),
            msg("m2", "m1", &["m1"], 2.0),
            msg("m3", "m2", &["m1", "m2"], 3.0),
            msg("", "m1", &["m1"], 4.0),
        ];
        let graph = ThreadGraph::build(&records);

        assert_eq!(graph.children("m1"), ["m2", "m3"]);
        assert_eq!(graph.children("m2"), ["m3"]);
        assert!(graph.children("m3").is_empty());
        // m2 -> m1 appears twice in the input but is stored once
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_linear_chain() {
        let records = vec![
            msg("m3", "m2", &["m1", "m2"], 300.0),
            msg("m1", "", &[], 100.0),
            msg("m2", "m1", &[], 200.0),
        ];
        let threads = build_threads(&records);

        assert_eq!(threads.len(), 1);
        assert_eq!(ids(&threads[0]), vec!["m1", "m2", "m3"]);
        assert_eq!(threads[0].total_messages, 3);
        assert_eq!(threads[0].reply_to_message_id, "m3");
    }

    #[test]
    fn test_singletons_and_thread_order() {
        let records = vec![
            msg("old", "", &[], 10.0),
            msg("a1", "", &[], 20.0),
            msg("a2", "a1", &[], 50.0),
            msg("new", "", &[], 40.0),
        ];
        let threads = build_threads(&records);

        assert_eq!(groupings(&threads), vec![vec!["a1", "a2"], vec!["new"], vec!["old"]]);
        assert!(threads.iter().all(|t| t.total_messages == t.messages.len()));
    }

    #[test]
    fn test_reply_cycle_terminates() {
        let records = vec![msg("a", "b", &[], 1.0), msg("b", "a", &[], 2.0)];
        let threads = build_threads(&records);

        assert_eq!(groupings(&threads), vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_self_reply() {
        let records = vec![msg("a", "a", &["a"], 1.0)];
        let threads = build_threads(&records);
        assert_eq!(groupings(&threads), vec![vec!["a"]]);
    }

    #[test]
    fn test_missing_ids_are_ignored() {
        let records = vec![
            msg("", "", &[], 5.0),
            msg("m1", "", &[], 1.0),
            msg("", "m1", &["m1"], 2.0),
        ];
        let threads = build_threads(&records);

        assert_eq!(groupings(&threads), vec![vec!["m1"]]);
    }

    #[test]
    fn test_unknown_parent_starts_its_own_thread() {
        // The parent was never fetched (e.g. outside the day window)
        let records = vec![
            msg("r1", "gone", &["gone"], 1.0),
            msg("r2", "r1", &["gone", "r1"], 2.0),
        ];
        let threads = build_threads(&records);
        assert_eq!(groupings(&threads), vec![vec!["r1", "r2"]]);
    }

    #[test]
    fn test_references_only_join_thread() {
        // No in_reply_to, but references name the root
        let records = vec![msg("root", "", &[], 1.0), msg("late", "", &["root"], 2.0)];
        let threads = build_threads(&records);

        assert_eq!(groupings(&threads), vec![vec!["root", "late"]]);
    }

    #[test]
    fn test_message_is_never_in_two_threads() {
        // "x" is reachable from both roots through references
        let records = vec![
            msg("r1", "", &[], 1.0),
            msg("x", "r1", &["r1"], 3.0),
            msg("r2", "", &[], 2.0),
            msg("y", "r2", &["r2", "x"], 4.0),
        ];
        let threads = build_threads(&records);

        let mut seen: Vec<&str> = threads.iter().flat_map(ids).collect();
        seen.sort();
        assert_eq!(seen, vec!["r1", "r2", "x", "y"]);
        // r1's walk reaches y through x before r2 is looked at
        assert_eq!(groupings(&threads), vec![vec!["r1", "x", "y"], vec!["r2"]]);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let records = vec![
            with_labels(msg("m1", "", &[], 1.0), &["SENT"]),
            with_labels(msg("m1", "", &[], 1.0), &["INBOX"]),
        ];
        let threads = build_threads(&records);

        assert_eq!(threads.len(), 1);
        assert_eq!(ids(&threads[0]), vec!["m1"]);
        assert_eq!(threads[0].labels.iter().collect::<Vec<_>>(), vec!["SENT"]);
    }

    #[test]
    fn test_label_union() {
        let records = vec![
            with_labels(msg("m1", "", &[], 1.0), &["INBOX", "\\Seen"]),
            with_labels(msg("m2", "m1", &[], 2.0), &["SENT"]),
        ];
        let threads = build_threads(&records);

        assert_eq!(
            threads[0].labels.iter().collect::<Vec<_>>(),
            vec!["INBOX", "SENT", "\\Seen"]
        );
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let records: Vec<MessageRecord> = (0..40)
            .map(|i| {
                let parent = if i % 4 == 0 { String::new() } else { format!("m{}", i - 1) };
                msg(&format!("m{}", i), &parent, &[], ((i * 7) % 13) as f64)
            })
            .collect();

        let first = build_threads(&records);
        let second = build_threads(&records);
        assert_eq!(groupings(&first), groupings(&second));
        assert_eq!(first.len(), 10);

        for thread in &first {
            assert!(thread.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
        assert!(first.windows(2).all(|w| w[0].last_activity() >= w[1].last_activity()));
        // thread ids are fresh on every run
        assert_ne!(first[0].thread_id, second[0].thread_id);
    }

    #[test]
    fn test_deep_chain() {
        let records: Vec<MessageRecord> = (0..20_000)
            .map(|i| {
                let parent = if i == 0 { String::new() } else { format!("m{}", i - 1) };
                msg(&format!("m{}", i), &parent, &[], i as f64)
            })
            .collect();

        let threads = build_threads(&records);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].total_messages, 20_000);
        assert_eq!(threads[0].reply_to_message_id, "m19999");
    }
}
