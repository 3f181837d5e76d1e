//! Payload types carried by protocol messages.
//!
//! Field names are PascalCase on the wire. [`TestCase`] is the only type
//! whose shape depends on the negotiated version; see
//! [`PayloadStyle`](crate::serializer::PayloadStyle).

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serializer::{current_payload_style, PayloadStyle};

/// A single test as known to the controller and the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestCase {
    pub id: String,
    pub fully_qualified_name: String,
    pub display_name: String,
    pub executor_uri: String,
    pub source: String,
    pub code_file_path: Option<String>,
    pub line_number: i32,
}

impl TestCase {
    pub fn new(
        fully_qualified_name: impl Into<String>,
        executor_uri: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let fully_qualified_name = fully_qualified_name.into();
        Self {
            id: String::new(),
            display_name: fully_qualified_name.clone(),
            fully_qualified_name,
            executor_uri: executor_uri.into(),
            source: source.into(),
            code_file_path: None,
            line_number: -1,
        }
    }
}

const PROP_ID: &str = "TestCase.Id";
const PROP_FQN: &str = "TestCase.FullyQualifiedName";
const PROP_DISPLAY_NAME: &str = "TestCase.DisplayName";
const PROP_EXECUTOR_URI: &str = "TestCase.ExecutorUri";
const PROP_SOURCE: &str = "TestCase.Source";
const PROP_CODE_FILE_PATH: &str = "TestCase.CodeFilePath";
const PROP_LINE_NUMBER: &str = "TestCase.LineNumber";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FlatTestCase {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    fully_qualified_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    executor_uri: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    code_file_path: Option<String>,
    #[serde(default)]
    line_number: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<Vec<Property>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Property {
    key: PropertyKey,
    #[serde(default)]
    value: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PropertyKey {
    id: String,
    #[serde(default)]
    value_type: String,
}

fn property(id: &str, value_type: &str, value: Value) -> Property {
    Property {
        key: PropertyKey {
            id: id.to_string(),
            value_type: value_type.to_string(),
        },
        value,
    }
}

impl Serialize for TestCase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match current_payload_style() {
            PayloadStyle::Flat => FlatTestCase {
                id: Some(self.id.clone()),
                fully_qualified_name: Some(self.fully_qualified_name.clone()),
                display_name: Some(self.display_name.clone()),
                executor_uri: Some(self.executor_uri.clone()),
                source: Some(self.source.clone()),
                code_file_path: self.code_file_path.clone(),
                line_number: Some(self.line_number),
                properties: None,
            }
            .serialize(serializer),
            PayloadStyle::PropertyBag => {
                let string = "System.String";
                let mut properties = vec![
                    property(PROP_ID, "System.Guid", Value::from(self.id.clone())),
                    property(PROP_FQN, string, Value::from(self.fully_qualified_name.clone())),
                    property(PROP_DISPLAY_NAME, string, Value::from(self.display_name.clone())),
                    property(PROP_EXECUTOR_URI, "System.Uri", Value::from(self.executor_uri.clone())),
                    property(PROP_SOURCE, string, Value::from(self.source.clone())),
                ];
                if let Some(path) = &self.code_file_path {
                    properties.push(property(PROP_CODE_FILE_PATH, string, Value::from(path.clone())));
                }
                properties.push(property(
                    PROP_LINE_NUMBER,
                    "System.Int32",
                    Value::from(self.line_number),
                ));

                #[derive(Serialize)]
                #[serde(rename_all = "PascalCase")]
                struct Bag {
                    properties: Vec<Property>,
                }
                Bag { properties }.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for TestCase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw = FlatTestCase::deserialize(deserializer)?;

        for Property { key, value } in raw.properties.take().unwrap_or_default() {
            let text = || value.as_str().map(str::to_string);
            match key.id.as_str() {
                PROP_ID => raw.id = raw.id.or_else(text),
                PROP_FQN => raw.fully_qualified_name = raw.fully_qualified_name.or_else(text),
                PROP_DISPLAY_NAME => raw.display_name = raw.display_name.or_else(text),
                PROP_EXECUTOR_URI => raw.executor_uri = raw.executor_uri.or_else(text),
                PROP_SOURCE => raw.source = raw.source.or_else(text),
                PROP_CODE_FILE_PATH => raw.code_file_path = raw.code_file_path.or_else(text),
                PROP_LINE_NUMBER => {
                    raw.line_number = raw
                        .line_number
                        .or_else(|| value.as_i64().and_then(|n| i32::try_from(n).ok()))
                }
                _ => {}
            }
        }

        let fully_qualified_name = raw.fully_qualified_name.unwrap_or_default();
        Ok(TestCase {
            id: raw.id.unwrap_or_default(),
            display_name: raw
                .display_name
                .unwrap_or_else(|| fully_qualified_name.clone()),
            fully_qualified_name,
            executor_uri: raw.executor_uri.unwrap_or_default(),
            source: raw.source.unwrap_or_default(),
            code_file_path: raw.code_file_path,
            line_number: raw.line_number.unwrap_or(-1),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestOutcome {
    #[default]
    None,
    Passed,
    Failed,
    Skipped,
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestResult {
    pub test_case: TestCase,
    pub outcome: TestOutcome,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
    pub display_name: Option<String>,
    pub computer_name: Option<String>,
    pub duration_ms: u64,
    pub attachments: Vec<AttachmentSet>,
}

impl TestResult {
    pub fn new(test_case: TestCase, outcome: TestOutcome) -> Self {
        Self {
            test_case,
            outcome,
            ..Self::default()
        }
    }
}

/// A group of files a collector or adapter attached to a run or result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AttachmentSet {
    pub uri: String,
    pub display_name: String,
    pub attachments: Vec<UriDataAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UriDataAttachment {
    pub uri: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestRunStatistics {
    pub executed_tests: u64,
    pub stats: BTreeMap<TestOutcome, u64>,
}

impl TestRunStatistics {
    /// Count of results with `outcome`.
    pub fn count(&self, outcome: TestOutcome) -> u64 {
        self.stats.get(&outcome).copied().unwrap_or(0)
    }
}

/// Incremental progress of a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestRunChangedEventArgs {
    pub test_run_statistics: Option<TestRunStatistics>,
    pub new_test_results: Vec<TestResult>,
    pub active_tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestRunCompleteEventArgs {
    pub test_run_statistics: Option<TestRunStatistics>,
    pub is_canceled: bool,
    pub is_aborted: bool,
    /// Root cause of an aborted run, as text.
    pub error: Option<String>,
    pub attachment_sets: Vec<AttachmentSet>,
    pub elapsed_time_ms: u64,
}

impl TestRunCompleteEventArgs {
    /// Completion args for a run that was aborted because of `error`.
    pub fn aborted(error: Option<String>) -> Self {
        Self {
            is_aborted: true,
            error,
            ..Self::default()
        }
    }
}

/// Payload of `TestExecution.Completed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestRunCompletePayload {
    pub test_run_complete_args: Option<TestRunCompleteEventArgs>,
    pub last_run_tests: Option<TestRunChangedEventArgs>,
    pub run_attachments: Vec<AttachmentSet>,
    pub executor_uris: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiscoveryCriteria {
    /// Adapter identifier to the sources it should look at.
    pub adapter_source_map: BTreeMap<String, Vec<String>>,
    pub package: Option<String>,
    pub run_settings: Option<String>,
    pub test_case_filter: Option<String>,
    pub frequency_of_discovered_test_event: u64,
}

/// Payload of `TestDiscovery.Completed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiscoveryCompletePayload {
    /// `-1` when discovery was aborted.
    pub total_tests: i64,
    pub last_discovered_tests: Vec<TestCase>,
    pub is_aborted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestExecutionContext {
    pub frequency_of_run_stats_change_event: u64,
    pub run_stats_change_event_timeout_ms: u64,
    pub in_isolation: bool,
    pub keep_alive: bool,
    pub are_tests_debugged: bool,
    pub is_debug: bool,
    pub test_case_filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestRunCriteriaWithSources {
    pub adapter_source_map: BTreeMap<String, Vec<String>>,
    pub package: Option<String>,
    pub run_settings: Option<String>,
    pub test_execution_context: TestExecutionContext,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestRunCriteriaWithTests {
    pub tests: Vec<TestCase>,
    pub package: Option<String>,
    pub run_settings: Option<String>,
    pub test_execution_context: TestExecutionContext,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestMessageLevel {
    #[default]
    Informational,
    Warning,
    Error,
}

/// Payload of `TestSession.Message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestMessagePayload {
    pub message_level: TestMessageLevel,
    pub message: String,
}

/// A process the controller should launch under a debugger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestProcessStartInfo {
    pub file_name: String,
    pub arguments: Option<String>,
    pub working_directory: Option<String>,
    pub environment_variables: BTreeMap<String, String>,
}

/// Version 7+ payload of `TestExecution.AttachDebugger`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestProcessAttachDebuggerPayload {
    #[serde(rename = "ProcessID")]
    pub process_id: i32,
    pub target_framework: Option<String>,
}

/// Controller reply to `TestExecution.AttachDebugger`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EditorAttachDebuggerAckPayload {
    pub attached: bool,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::to_payload_value;

    fn sample() -> TestCase {
        let mut test = TestCase::new("Suite.Math.Adds", "executor://unit", "/src/bin/math.dll");
        test.id = "2d9b0c4e-0000-0000-0000-000000000001".to_string();
        test.code_file_path = Some("/src/math.rs".to_string());
        test.line_number = 42;
        test
    }

    #[test]
    fn flat_test_case_uses_pascal_case_fields() {
        let value = to_payload_value(&sample(), 2).unwrap();
        assert_eq!(value["FullyQualifiedName"], "Suite.Math.Adds");
        assert_eq!(value["Source"], "/src/bin/math.dll");
        assert_eq!(value["LineNumber"], 42);
        assert!(value.get("Properties").is_none());
    }

    #[test]
    fn property_bag_test_case_for_legacy_versions() {
        for version in [0, 1, 3] {
            let value = to_payload_value(&sample(), version).unwrap();
            let properties = value["Properties"].as_array().unwrap();
            let fqn = properties
                .iter()
                .find(|p| p["Key"]["Id"] == PROP_FQN)
                .unwrap();
            assert_eq!(fqn["Value"], "Suite.Math.Adds");
            assert!(value.get("FullyQualifiedName").is_none());
        }
    }

    #[test]
    fn both_shapes_decode_to_the_same_test_case() {
        let flat: TestCase = serde_json::from_value(to_payload_value(&sample(), 4).unwrap()).unwrap();
        let bag: TestCase = serde_json::from_value(to_payload_value(&sample(), 1).unwrap()).unwrap();
        assert_eq!(flat, sample());
        assert_eq!(bag, sample());
    }

    #[test]
    fn nested_test_cases_follow_the_version_style() {
        let criteria = TestRunCriteriaWithTests {
            tests: vec![sample()],
            ..TestRunCriteriaWithTests::default()
        };
        let legacy = to_payload_value(&criteria, 1).unwrap();
        assert!(legacy["Tests"][0].get("Properties").is_some());
        let current = to_payload_value(&criteria, 7).unwrap();
        assert_eq!(current["Tests"][0]["Id"], sample().id);
    }

    #[test]
    fn sparse_test_case_gets_defaults() {
        let test: TestCase =
            serde_json::from_str(r#"{"FullyQualifiedName":"A.B","Source":"a.dll"}"#).unwrap();
        assert_eq!(test.display_name, "A.B");
        assert_eq!(test.line_number, -1);
        assert!(test.code_file_path.is_none());
    }

    #[test]
    fn statistics_keyed_by_outcome() {
        let mut stats = TestRunStatistics::default();
        stats.executed_tests = 3;
        stats.stats.insert(TestOutcome::Passed, 2);
        stats.stats.insert(TestOutcome::Failed, 1);

        let value = to_payload_value(&stats, 7).unwrap();
        assert_eq!(value["Stats"]["Passed"], 2);
        let back: TestRunStatistics = serde_json::from_value(value).unwrap();
        assert_eq!(back.count(TestOutcome::Failed), 1);
        assert_eq!(back.count(TestOutcome::Skipped), 0);
    }

    #[test]
    fn attach_debugger_payload_uses_process_id_tag() {
        let payload = TestProcessAttachDebuggerPayload {
            process_id: 4242,
            target_framework: Some("net8.0".to_string()),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["ProcessID"], 4242);
        assert_eq!(value["TargetFramework"], "net8.0");
    }
}
