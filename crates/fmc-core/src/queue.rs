//! The operation queue document: one production run's processes and their
//! operations.
//!
//! The wire format keeps the keys the rest of the cell already speaks:
//!
//! ```json
//! {
//!     "Run Identifier": "admin-20210201-171824-RealRun",
//!     "Queued Processes": {
//!         "ACordganizerLid.txt": {
//!             "ACordganizerLid_1of2": {
//!                 "Startup Priority": 1,
//!                 "complete": false,
//!                 "StartupTasksComplete": false,
//!                 "part": 1
//!             },
//!             "ACordganizerLid_2of2": { "complete": false, "part": 2 }
//!         }
//!     }
//! }
//! ```
//!
//! Both maps are ordered; submission order of processes is significant.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use crate::id::RunIdentifier;
use crate::operation::{Completion, Operation, OperationKey, StartupGate};
use crate::{Error, Result};

/// Extension carried by process keys (`A.txt`).
pub const PROCESS_FILE_EXTENSION: &str = ".txt";

/// A queued parent process and its operations, held in `k` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    /// Process key as submitted, normally the process file name.
    pub name: String,
    pub operations: Vec<Operation>,
}

impl Process {
    /// Base name shared by every operation key of this process.
    pub fn base_name(&self) -> &str {
        match self.operations.first() {
            Some(op) => &op.key.process,
            None => self
                .name
                .strip_suffix(PROCESS_FILE_EXTENSION)
                .unwrap_or(&self.name),
        }
    }

    /// The `k=1` operation.
    pub fn first(&self) -> Option<&Operation> {
        self.operations.iter().find(|op| op.key.is_first())
    }

    pub fn first_mut(&mut self) -> Option<&mut Operation> {
        self.operations.iter_mut().find(|op| op.key.is_first())
    }

    pub fn operation_mut(&mut self, key: &OperationKey) -> Option<&mut Operation> {
        self.operations.iter_mut().find(|op| op.key == *key)
    }

    /// Whether this process's startup gate has opened.
    pub fn startup_tasks_complete(&self) -> bool {
        self.first()
            .and_then(|op| op.startup)
            .map(|gate| gate.tasks_complete)
            .unwrap_or(false)
    }

    pub fn is_finished(&self) -> bool {
        self.operations.iter().all(|op| op.complete.is_finished())
    }

    pub fn running(&self) -> impl Iterator<Item = &Operation> {
        self.operations
            .iter()
            .filter(|op| op.complete == Completion::Running)
    }
}

/// One production run: a run identifier and its ordered queued processes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "DocumentRecord")]
pub struct QueueDocument {
    pub run_identifier: RunIdentifier,
    pub processes: Vec<Process>,
}

impl QueueDocument {
    /// Parse a submitted payload. Empty payloads and JSON `null` yield
    /// `None`; structural problems are [`Error::MalformedDocument`].
    pub fn from_json(payload: &[u8]) -> Result<Option<Self>> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice::<Option<QueueDocument>>(payload)
            .map_err(|e| Error::MalformedDocument(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.processes.iter().all(Process::is_finished)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.processes.iter().flat_map(|p| p.operations.iter())
    }

    pub fn process_by_base(&self, base: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.base_name() == base)
    }

    pub fn process_by_base_mut(&mut self, base: &str) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.base_name() == base)
    }

    pub fn operation(&self, key: &OperationKey) -> Option<&Operation> {
        self.process_by_base(&key.process)?
            .operations
            .iter()
            .find(|op| op.key == *key)
    }

    pub fn operation_mut(&mut self, key: &OperationKey) -> Option<&mut Operation> {
        self.process_by_base_mut(&key.process)?.operation_mut(key)
    }

    /// Check the two-level shape the scheduler relies on.
    pub fn validate(&self) -> Result<()> {
        let mut bases = HashSet::new();

        for process in &self.processes {
            let malformed =
                |msg: String| Error::MalformedDocument(format!("process '{}': {}", process.name, msg));

            let Some(first) = process.operations.first() else {
                return Err(malformed("no operations".to_string()));
            };
            let base = &first.key.process;
            let total = first.key.total;

            if !bases.insert(base.clone()) {
                return Err(malformed(format!("duplicate process base name '{}'", base)));
            }

            for (idx, op) in process.operations.iter().enumerate() {
                if op.key.process != *base || op.key.total != total {
                    return Err(malformed(format!(
                        "operation '{}' does not belong to {}_*of{}",
                        op.key, base, total
                    )));
                }
                if op.key.part as usize != idx + 1 {
                    return Err(malformed(format!(
                        "expected part {} but found '{}'",
                        idx + 1,
                        op.key
                    )));
                }
                match (op.key.is_first(), op.startup.is_some()) {
                    (true, false) => {
                        return Err(malformed(format!(
                            "first operation '{}' has no startup priority",
                            op.key
                        )));
                    }
                    (false, true) => {
                        return Err(malformed(format!(
                            "only the first operation may carry startup fields, found on '{}'",
                            op.key
                        )));
                    }
                    _ => {}
                }
            }

            if process.operations.len() != total as usize {
                return Err(malformed(format!(
                    "expected {} operations, found {}",
                    total,
                    process.operations.len()
                )));
            }
        }

        Ok(())
    }

    /// Startup priorities that leave a gap below the highest assigned value.
    ///
    /// The priority counter only advances one step past a started process, so
    /// a missing value stalls every process above it.
    pub fn priority_gaps(&self) -> Vec<u32> {
        let assigned: HashSet<u32> = self
            .processes
            .iter()
            .filter_map(|p| p.first().and_then(|op| op.startup))
            .map(|gate| gate.priority)
            .collect();
        let max = assigned.iter().copied().max().unwrap_or(0);
        (1..max).filter(|p| !assigned.contains(p)).collect()
    }

    /// Build a fresh document from operator requests.
    ///
    /// Requests with quantity 0 are skipped. First operations without an
    /// explicit priority get the next unused number starting from 1, in
    /// request order.
    pub fn encode(run_identifier: RunIdentifier, requests: &[ProcessRequest]) -> Result<Self> {
        let explicit: HashSet<u32> = requests.iter().filter_map(|r| r.priority).collect();
        let mut next_auto = 1;
        let mut processes = Vec::new();

        for request in requests.iter().filter(|r| r.quantity > 0) {
            let priority = match request.priority {
                Some(p) => p,
                None => {
                    while explicit.contains(&next_auto) {
                        next_auto += 1;
                    }
                    let assigned = next_auto;
                    next_auto += 1;
                    assigned
                }
            };

            let mut operations = Vec::with_capacity(request.quantity as usize);
            for part in 1..=request.quantity {
                let key = OperationKey::new(&request.name, part, request.quantity)?;
                let op = Operation::new(key);
                operations.push(if part == 1 {
                    op.with_startup(StartupGate::new(priority))
                } else {
                    op
                });
            }

            processes.push(Process {
                name: format!("{}{}", request.name, PROCESS_FILE_EXTENSION),
                operations,
            });
        }

        let doc = Self {
            run_identifier,
            processes,
        };
        doc.validate()?;
        Ok(doc)
    }
}

/// Operator request for one process in [`QueueDocument::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    /// Process base name, without the file extension.
    pub name: String,
    pub quantity: u32,
    pub priority: Option<u32>,
}

impl Serialize for QueueDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        DocumentRecord::from(self).serialize(serializer)
    }
}

// Wire representation

#[derive(Serialize, Deserialize)]
struct DocumentRecord {
    #[serde(rename = "Run Identifier")]
    run_identifier: RunIdentifier,
    #[serde(rename = "Queued Processes")]
    queued_processes: OrderedMap<OrderedMap<OperationRecord>>,
}

#[derive(Serialize, Deserialize)]
struct OperationRecord {
    #[serde(
        rename = "Startup Priority",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    startup_priority: Option<u32>,
    complete: Completion,
    #[serde(
        rename = "StartupTasksComplete",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    startup_tasks_complete: Option<bool>,
    #[serde(alias = "operationNumber", default, skip_serializing_if = "Option::is_none")]
    part: Option<u32>,
}

impl TryFrom<DocumentRecord> for QueueDocument {
    type Error = Error;

    fn try_from(record: DocumentRecord) -> Result<Self> {
        let mut processes = Vec::with_capacity(record.queued_processes.0.len());

        for (name, ops) in record.queued_processes.0 {
            let mut operations = Vec::with_capacity(ops.0.len());
            for (op_name, op) in ops.0 {
                let key: OperationKey = op_name
                    .parse()
                    .map_err(|e: Error| Error::MalformedDocument(e.to_string()))?;

                if let Some(part) = op.part {
                    if part != key.part {
                        return Err(Error::MalformedDocument(format!(
                            "operation '{}' declares part {}",
                            key, part
                        )));
                    }
                }

                let startup = match (op.startup_priority, op.startup_tasks_complete) {
                    (Some(priority), tasks) => Some(StartupGate {
                        priority,
                        tasks_complete: tasks.unwrap_or(false),
                    }),
                    (None, Some(_)) => {
                        return Err(Error::MalformedDocument(format!(
                            "operation '{}' has StartupTasksComplete but no Startup Priority",
                            key
                        )));
                    }
                    (None, None) => None,
                };

                operations.push(Operation {
                    key,
                    complete: op.complete,
                    startup,
                });
            }
            operations.sort_by_key(|op| op.key.part);
            processes.push(Process { name, operations });
        }

        let doc = QueueDocument {
            run_identifier: record.run_identifier,
            processes,
        };
        doc.validate()?;
        Ok(doc)
    }
}

impl From<&QueueDocument> for DocumentRecord {
    fn from(doc: &QueueDocument) -> Self {
        let queued_processes = doc
            .processes
            .iter()
            .map(|process| {
                let ops = process
                    .operations
                    .iter()
                    .map(|op| {
                        (
                            op.key.to_string(),
                            OperationRecord {
                                startup_priority: op.startup.map(|g| g.priority),
                                complete: op.complete,
                                startup_tasks_complete: op.startup.map(|g| g.tasks_complete),
                                part: Some(op.key.part),
                            },
                        )
                    })
                    .collect();
                (process.name.clone(), OrderedMap(ops))
            })
            .collect();

        DocumentRecord {
            run_identifier: doc.run_identifier.clone(),
            queued_processes: OrderedMap(queued_processes),
        }
    }
}

/// A JSON object that keeps its key order.
struct OrderedMap<V>(Vec<(String, V)>);

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(de::Error::custom(format!("duplicate key '{}'", key)));
            }
            entries.push((key, value));
        }
        Ok(OrderedMap(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "Run Identifier": "admin-20210201-171824-RealRun",
        "Queued Processes": {
            "BCordganizerBody.txt": {
                "BCordganizerBody_1of2": {
                    "Startup Priority": 2,
                    "complete": false,
                    "StartupTasksComplete": false,
                    "operationNumber": 1
                },
                "BCordganizerBody_2of2": { "complete": false, "operationNumber": 2 }
            },
            "ACordganizerLid.txt": {
                "ACordganizerLid_1of2": {
                    "Startup Priority": 1,
                    "complete": "Running",
                    "StartupTasksComplete": true,
                    "operationNumber": 1
                },
                "ACordganizerLid_2of2": { "complete": false, "operationNumber": 2 }
            }
        }
    }"#;

    fn make_doc(json: &str) -> QueueDocument {
        QueueDocument::from_json(json.as_bytes()).unwrap().unwrap()
    }

    #[test]
    fn test_parse_keeps_submission_order() {
        let doc = make_doc(SAMPLE);
        assert_eq!(doc.run_identifier.as_str(), "admin-20210201-171824-RealRun");
        let names: Vec<_> = doc.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["BCordganizerBody.txt", "ACordganizerLid.txt"]);
        assert_eq!(doc.processes[1].base_name(), "ACordganizerLid");

        let first = doc.processes[1].first().unwrap();
        assert_eq!(first.complete, Completion::Running);
        assert_eq!(
            first.startup,
            Some(StartupGate {
                priority: 1,
                tasks_complete: true
            })
        );
        assert!(doc.processes[1].startup_tasks_complete());
        assert!(!doc.processes[0].startup_tasks_complete());
    }

    #[test]
    fn test_serialized_form_survives_reparse() {
        let doc = make_doc(SAMPLE);
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"Startup Priority\": 2"));
        assert!(json.contains("\"complete\": \"Running\""));
        assert!(json.find("BCordganizerBody.txt") < json.find("ACordganizerLid.txt"));
        assert_eq!(make_doc(&json), doc);
    }

    #[test]
    fn test_null_and_empty_payloads() {
        assert!(QueueDocument::from_json(b"null").unwrap().is_none());
        assert!(QueueDocument::from_json(b"").unwrap().is_none());
        assert!(QueueDocument::from_json(b"  \n").unwrap().is_none());

        let doc = make_doc(r#"{"Run Identifier": "r", "Queued Processes": {}}"#);
        assert!(doc.is_empty());
        assert!(doc.is_finished());
    }

    #[test]
    fn test_operations_sorted_by_part() {
        let doc = make_doc(
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {
                "A_2of2": {"complete": false},
                "A_1of2": {"Startup Priority": 1, "complete": false, "StartupTasksComplete": false}
            }}}"#,
        );
        let parts: Vec<_> = doc.processes[0].operations.iter().map(|o| o.key.part).collect();
        assert_eq!(parts, vec![1, 2]);
    }

    #[test]
    fn test_malformed_documents() {
        let cases = [
            // not an object
            r#"[1, 2]"#,
            // missing run identifier
            r#"{"Queued Processes": {}}"#,
            // bad operation name
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {"A-one": {"complete": false}}}}"#,
            // first operation without priority
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {"A_1of1": {"complete": false}}}}"#,
            // missing part 2
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {"A_1of2": {"Startup Priority": 1, "complete": false}}}}"#,
            // startup fields on a later operation
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {
                "A_1of2": {"Startup Priority": 1, "complete": false},
                "A_2of2": {"Startup Priority": 2, "complete": false}}}}"#,
            // unknown completion label
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {"A_1of1": {"Startup Priority": 1, "complete": "Paused"}}}}"#,
            // mixed base names
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {
                "A_1of2": {"Startup Priority": 1, "complete": false},
                "B_2of2": {"complete": false}}}}"#,
            // duplicate base across processes
            r#"{"Run Identifier": "r", "Queued Processes": {
                "A.txt": {"A_1of1": {"Startup Priority": 1, "complete": false}},
                "A-copy.txt": {"A_1of1": {"Startup Priority": 2, "complete": false}}}}"#,
            // empty process
            r#"{"Run Identifier": "r", "Queued Processes": {"A.txt": {}}}"#,
        ];

        for case in cases {
            let result = QueueDocument::from_json(case.as_bytes());
            assert!(
                matches!(result, Err(Error::MalformedDocument(_))),
                "expected malformed for {}",
                case
            );
        }
    }

    #[test]
    fn test_operation_lookup() {
        let mut doc = make_doc(SAMPLE);
        let key: OperationKey = "BCordganizerBody_2of2".parse().unwrap();
        doc.operation_mut(&key).unwrap().mark_done();
        assert_eq!(doc.operation(&key).unwrap().complete, Completion::Done);

        let missing: OperationKey = "Nope_1of1".parse().unwrap();
        assert!(doc.operation(&missing).is_none());
    }

    #[test]
    fn test_encode_assigns_priorities() {
        let requests = vec![
            ProcessRequest {
                name: "A".to_string(),
                quantity: 2,
                priority: None,
            },
            ProcessRequest {
                name: "Skipped".to_string(),
                quantity: 0,
                priority: None,
            },
            ProcessRequest {
                name: "B".to_string(),
                quantity: 1,
                priority: Some(1),
            },
            ProcessRequest {
                name: "C".to_string(),
                quantity: 3,
                priority: None,
            },
        ];

        let doc = QueueDocument::encode(RunIdentifier::new("op-run"), &requests).unwrap();
        assert_eq!(doc.processes.len(), 3);
        assert_eq!(doc.processes[0].name, "A.txt");

        let priorities: Vec<_> = doc
            .processes
            .iter()
            .map(|p| p.first().unwrap().startup.unwrap().priority)
            .collect();
        assert_eq!(priorities, vec![2, 1, 3]);
        assert_eq!(doc.processes[2].operations.len(), 3);
        assert!(doc.processes[2].operations[1].startup.is_none());
        assert!(doc.priority_gaps().is_empty());
    }

    #[test]
    fn test_priority_gaps() {
        let doc = make_doc(
            r#"{"Run Identifier": "r", "Queued Processes": {
                "A.txt": {"A_1of1": {"Startup Priority": 3, "complete": false}},
                "B.txt": {"B_1of1": {"Startup Priority": 1, "complete": false}}}}"#,
        );
        assert_eq!(doc.priority_gaps(), vec![2]);
    }
}
