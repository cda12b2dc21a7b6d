//! Property tests for the task fold and the projections built on it.

use proptest::prelude::*;
use serde_json::{Value, json};
use sprintlog_core::PmService;
use sprintlog_core::db::open_in_memory;
use sprintlog_core::event::{AggregateType, Event, EventStore};
use sprintlog_core::model::TaskStatus;
use sprintlog_core::reduce::task::TaskCreated;
use sprintlog_core::reduce::{Folded, Reducer, TaskReducer, TaskState};

const TASK_ID: &str = "task-under-test";

#[derive(Debug, Clone)]
enum Op {
    Rename(String),
    Estimate(i64),
    Status(TaskStatus),
    AddToSprint(u8),
    RemoveFromSprint,
    LinkCommit(u8),
    LinkIssue(i64),
    Delete,
    Unknown,
}

impl Op {
    fn into_parts(self) -> (&'static str, Value) {
        match self {
            Self::Rename(title) => ("TaskUpdated", json!({ "title": title })),
            Self::Estimate(points) => ("TaskEstimated", json!({ "points": points })),
            Self::Status(status) => ("TaskStatusChanged", json!({ "to": status.as_str() })),
            Self::AddToSprint(n) => ("TaskAddedToSprint", json!({ "sprintId": format!("sprint-{n}") })),
            Self::RemoveFromSprint => ("TaskRemovedFromSprint", json!({})),
            Self::LinkCommit(n) => ("TaskLinkedToCommit", json!({ "commitSha": format!("{n:040x}") })),
            Self::LinkIssue(number) => ("TaskLinkedToIssue", json!({ "issueNumber": number })),
            Self::Delete => ("TaskDeleted", json!({})),
            Self::Unknown => ("TaskArchivedToTape", json!({ "reel": 7 })),
        }
    }
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z]{1,12}".prop_map(Op::Rename),
        (0i64..40).prop_map(Op::Estimate),
        prop::sample::select(TaskStatus::ALL.to_vec()).prop_map(Op::Status),
        (0u8..3).prop_map(Op::AddToSprint),
        Just(Op::RemoveFromSprint),
        (0u8..4).prop_map(Op::LinkCommit),
        (1i64..6).prop_map(Op::LinkIssue),
        Just(Op::Delete),
        Just(Op::Unknown),
    ]
}

fn event(seq: i64, event_type: &str, payload: Value) -> Event {
    let Value::Object(payload) = payload else {
        panic!("payload must be an object");
    };
    Event {
        event_id: seq,
        event_type: event_type.to_string(),
        aggregate_type: AggregateType::Task,
        aggregate_id: TASK_ID.to_string(),
        payload,
        metadata: None,
        sequence_number: seq,
        recorded_at_us: 1_000_000 * seq,
    }
}

/// A created task followed by `ops`, numbered from 1.
fn history(ops: &[Op]) -> Vec<Event> {
    let created = json!({ "projectId": "p", "title": "seed" });
    std::iter::once(("TaskCreated", created))
        .chain(ops.iter().cloned().map(Op::into_parts))
        .zip(1..)
        .map(|((event_type, payload), seq)| event(seq, event_type, payload))
        .collect()
}

fn fold(events: &[Event], acc: Folded<TaskState>) -> Folded<TaskState> {
    events.iter().fold(acc, TaskReducer::apply)
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn incremental_fold_equals_full_fold(
        ops in prop::collection::vec(arb_op(), 0..24),
        split in any::<prop::sample::Index>(),
    ) {
        let events = history(&ops);
        let at = split.index(events.len() + 1);
        let (head, tail) = events.split_at(at);

        let resumed = fold(tail, fold(head, Folded::Absent));
        prop_assert_eq!(resumed.into_state(), TaskReducer::reduce(&events));
    }

    #[test]
    fn deletion_is_terminal(
        before in prop::collection::vec(arb_op(), 0..12),
        after in prop::collection::vec(arb_op(), 0..12),
    ) {
        let mut ops = before;
        ops.push(Op::Delete);
        ops.extend(after);
        let events = history(&ops);

        prop_assert_eq!(fold(&events, Folded::Absent), Folded::Deleted);
        prop_assert!(TaskReducer::reduce(&events).is_none());
    }

    #[test]
    fn links_never_repeat(ops in prop::collection::vec(arb_op(), 0..32)) {
        let live: Vec<Op> = ops.into_iter().filter(|op| !matches!(op, Op::Delete)).collect();
        let state = TaskReducer::reduce(&history(&live)).expect("never deleted");

        let mut commits = state.linked_commits.clone();
        commits.sort();
        commits.dedup();
        prop_assert_eq!(commits.len(), state.linked_commits.len());
        let mut issues = state.linked_issues.clone();
        issues.sort_unstable();
        issues.dedup();
        prop_assert_eq!(issues.len(), state.linked_issues.len());
    }
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(48))]

    #[test]
    fn stored_replay_equals_in_memory_fold(ops in prop::collection::vec(arb_op(), 0..16)) {
        let conn = open_in_memory().expect("store");
        let store = EventStore::new(&conn);
        let expected = history(&ops);
        for e in &expected {
            store
                .append_raw(
                    &e.event_type,
                    e.aggregate_type,
                    &e.aggregate_id,
                    Value::Object(e.payload.clone()),
                    None,
                    e.recorded_at_us,
                )
                .expect("append");
        }

        let replayed = store.get_events(AggregateType::Task, TASK_ID, None).expect("read");
        let seqs: Vec<i64> = replayed.iter().map(|e| e.sequence_number).collect();
        let dense: Vec<i64> = (1..).take(expected.len()).collect();
        prop_assert_eq!(seqs, dense);
        prop_assert_eq!(TaskReducer::reduce(&replayed), TaskReducer::reduce(&expected));
    }

    #[test]
    fn task_seqs_are_dense_and_never_reused(
        plan in prop::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..12),
    ) {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = service.create_project("Seqs", None).expect("project").project_id;

        let mut issued: Vec<i64> = Vec::new();
        let mut live: Vec<String> = Vec::new();
        for (delete, pick) in plan {
            if delete && !live.is_empty() {
                let victim = live.remove(pick.index(live.len()));
                service.delete_task(&victim).expect("delete");
                continue;
            }
            let task = service
                .create_task(&TaskCreated {
                    project_id: project_id.clone(),
                    title: format!("task {}", issued.len() + 1),
                    ..TaskCreated::default()
                })
                .expect("create");
            issued.push(task.seq);
            live.push(task.state.task_id);
        }

        let dense: Vec<i64> = (1..).take(issued.len()).collect();
        prop_assert_eq!(issued, dense);
    }
}
