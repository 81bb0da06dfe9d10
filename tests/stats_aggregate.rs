// tests/stats_aggregate.rs
//
// Aggregator invariants across many batches and across threads.

use chrono::Utc;
use std::sync::Arc;
use std::thread;

use subreddit_stats::stats::{Aggregator, TOP_K};
use subreddit_stats::Item;

fn item(id: &str, author: &str, score: i64) -> Item {
    Item {
        id: id.into(),
        title: format!("post {id}"),
        author: author.into(),
        score,
        created_at: Utc::now(),
    }
}

/// Tiny deterministic PRNG so runs are reproducible without extra deps.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, n: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % n
    }
}

#[test]
fn rescored_item_takes_latest_score() {
    let agg = Aggregator::new(["foo"]);
    agg.ingest("foo", vec![item("1", "alice", 10)]).unwrap();
    agg.ingest("foo", vec![item("1", "alice", 50), item("2", "bob", 5)])
        .unwrap();

    let snap = agg.snapshot(Some("foo")).unwrap();
    let foo = snap.channel("foo").unwrap();
    let ranked: Vec<(&str, i64)> = foo
        .top_items
        .iter()
        .map(|i| (i.id.as_str(), i.score))
        .collect();
    assert_eq!(ranked, vec![("1", 50), ("2", 5)]);
    assert_eq!(foo.author_counts.len(), 2);
    assert_eq!(foo.author_counts["alice"], 1);
    assert_eq!(foo.author_counts["bob"], 1);
}

#[test]
fn invariants_hold_over_random_batches() {
    let agg = Aggregator::new(["foo"]);
    let mut rng = Lcg(7);
    let mut first_author: std::collections::HashMap<String, String> = Default::default();

    for _ in 0..60 {
        let batch: Vec<Item> = (0..25)
            .map(|_| {
                let id = format!("t3_{}", rng.next(400));
                let author = format!("user{}", rng.next(30));
                first_author.entry(id.clone()).or_insert(author.clone());
                item(&id, &author, rng.next(50) as i64)
            })
            .collect();
        agg.ingest("foo", batch).unwrap();

        let snap = agg.snapshot(Some("foo")).unwrap();
        let foo = &snap.channels[0];

        assert!(foo.top_items.len() <= TOP_K);
        for pair in foo.top_items.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                a.score > b.score || (a.score == b.score && a.id < b.id),
                "ranking out of order: {a:?} before {b:?}"
            );
        }

        // Each distinct id credits exactly one author, once.
        let credited: u64 = foo.author_counts.values().sum();
        assert_eq!(credited as usize, first_author.len());
        assert_eq!(foo.seen, first_author.len());
    }
}

#[test]
fn repeated_ingest_of_same_batch_changes_nothing_but_counters() {
    let agg = Aggregator::new(["foo"]);
    let batch = vec![item("a", "x", 3), item("b", "y", 2)];
    agg.ingest("foo", batch.clone()).unwrap();
    let before = agg.snapshot(Some("foo")).unwrap().channels.remove(0);

    let summary = agg.ingest("foo", batch).unwrap();
    assert_eq!(summary.new_items, 0);
    assert_eq!(summary.refreshed, 2);

    let after = agg.snapshot(Some("foo")).unwrap().channels.remove(0);
    assert_eq!(before.top_items, after.top_items);
    assert_eq!(before.author_counts, after.author_counts);
    assert_eq!(after.ingests, before.ingests + 1);
}

#[test]
fn snapshots_are_independent_copies() {
    let agg = Aggregator::new(["foo"]);
    agg.ingest("foo", vec![item("a", "x", 1)]).unwrap();
    let snap = agg.snapshot(None).unwrap();

    agg.ingest("foo", vec![item("b", "y", 9)]).unwrap();
    assert_eq!(snap.channels[0].top_items.len(), 1);
    assert_eq!(agg.snapshot(None).unwrap().channels[0].top_items.len(), 2);
}

#[test]
fn concurrent_channels_do_not_interfere() {
    let channels: Vec<String> = (0..4).map(|n| format!("chan{n}")).collect();
    let agg = Arc::new(Aggregator::new(channels.clone()));

    let writers: Vec<_> = channels
        .iter()
        .cloned()
        .map(|ch| {
            let agg = Arc::clone(&agg);
            thread::spawn(move || {
                for round in 0..50 {
                    let batch = (0..10)
                        .map(|n| {
                            let id = format!("{ch}-{round}-{n}");
                            item(&id, &format!("{ch}-author{}", n % 3), (round * 10 + n) as i64)
                        })
                        .collect();
                    agg.ingest(&ch, batch).unwrap();
                }
            })
        })
        .collect();

    // Readers never observe a half-applied batch: ids always arrive in
    // groups of ten.
    let reader = {
        let agg = Arc::clone(&agg);
        thread::spawn(move || {
            for _ in 0..200 {
                let snap = agg.snapshot(None).unwrap();
                for ch in &snap.channels {
                    assert_eq!(ch.seen % 10, 0, "partial merge visible in {}", ch.channel);
                    assert_eq!(ch.seen as u64, ch.ingests * 10);
                }
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    let snap = agg.snapshot(None).unwrap();
    for ch in &snap.channels {
        assert_eq!(ch.ingests, 50);
        assert_eq!(ch.seen, 500);
        assert_eq!(ch.top_items.len(), TOP_K);
        assert!(ch.top_items.iter().all(|i| i.id.starts_with(&ch.channel)));
        assert_eq!(ch.author_counts.values().sum::<u64>(), 500);
    }
}
