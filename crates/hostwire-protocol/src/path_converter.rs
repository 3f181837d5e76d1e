//! Translation of file paths between the host's and the controller's view.
//!
//! When tests run on a deployed copy of the sources, paths coming from the
//! controller point at its own tree. A [`PrefixPathConverter`] swaps the
//! prefixes on every path-bearing payload field; [`NullPathConverter`] is
//! the identity used when both sides see the same file system.
//!
//! Conversions take their input by value and return the converted value.

use std::collections::BTreeMap;
use std::path::{Path, MAIN_SEPARATOR};

use crate::error::{ProtocolError, Result};
use crate::object_model::{
    AttachmentSet, DiscoveryCompletePayload, DiscoveryCriteria, TestCase, TestProcessStartInfo,
    TestResult, TestRunChangedEventArgs, TestRunCompleteEventArgs, TestRunCompletePayload,
    TestRunCriteriaWithSources, TestRunCriteriaWithTests,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConversionDirection {
    /// Host view to controller view (outbound payloads).
    Send,
    /// Controller view to host view (inbound payloads).
    Receive,
}

/// Rewrites path-bearing fields of protocol payloads.
///
/// Only [`update_path`](PathConverter::update_path) is required; the typed
/// conversions are built on it and rewrite exactly the fields that name
/// files, leaving everything else alone.
pub trait PathConverter: Send + Sync {
    fn update_path(&self, path: String, direction: PathConversionDirection) -> String;

    fn update_optional_path(
        &self,
        path: Option<String>,
        direction: PathConversionDirection,
    ) -> Option<String> {
        path.map(|p| self.update_path(p, direction))
    }

    fn update_paths(&self, paths: Vec<String>, direction: PathConversionDirection) -> Vec<String> {
        paths
            .into_iter()
            .map(|p| self.update_path(p, direction))
            .collect()
    }

    fn update_test_case(&self, mut test: TestCase, direction: PathConversionDirection) -> TestCase {
        test.source = self.update_path(test.source, direction);
        test.code_file_path = self.update_optional_path(test.code_file_path, direction);
        test
    }

    fn update_test_cases(
        &self,
        tests: Vec<TestCase>,
        direction: PathConversionDirection,
    ) -> Vec<TestCase> {
        tests
            .into_iter()
            .map(|t| self.update_test_case(t, direction))
            .collect()
    }

    fn update_test_result(
        &self,
        mut result: TestResult,
        direction: PathConversionDirection,
    ) -> TestResult {
        result.test_case = self.update_test_case(result.test_case, direction);
        result.attachments = self.update_attachment_sets(result.attachments, direction);
        result
    }

    fn update_attachment_sets(
        &self,
        sets: Vec<AttachmentSet>,
        direction: PathConversionDirection,
    ) -> Vec<AttachmentSet> {
        sets.into_iter()
            .map(|mut set| {
                for attachment in &mut set.attachments {
                    attachment.uri = self.update_path(std::mem::take(&mut attachment.uri), direction);
                }
                set
            })
            .collect()
    }

    fn update_discovery_criteria(
        &self,
        mut criteria: DiscoveryCriteria,
        direction: PathConversionDirection,
    ) -> DiscoveryCriteria {
        criteria.adapter_source_map = self.update_source_map(criteria.adapter_source_map, direction);
        criteria.package = self.update_optional_path(criteria.package, direction);
        criteria
    }

    fn update_run_criteria_with_sources(
        &self,
        mut criteria: TestRunCriteriaWithSources,
        direction: PathConversionDirection,
    ) -> TestRunCriteriaWithSources {
        criteria.adapter_source_map = self.update_source_map(criteria.adapter_source_map, direction);
        criteria.package = self.update_optional_path(criteria.package, direction);
        criteria
    }

    fn update_run_criteria_with_tests(
        &self,
        mut criteria: TestRunCriteriaWithTests,
        direction: PathConversionDirection,
    ) -> TestRunCriteriaWithTests {
        criteria.tests = self.update_test_cases(criteria.tests, direction);
        criteria.package = self.update_optional_path(criteria.package, direction);
        criteria
    }

    fn update_source_map(
        &self,
        map: BTreeMap<String, Vec<String>>,
        direction: PathConversionDirection,
    ) -> BTreeMap<String, Vec<String>> {
        map.into_iter()
            .map(|(adapter, sources)| (adapter, self.update_paths(sources, direction)))
            .collect()
    }

    fn update_run_changed_args(
        &self,
        mut args: TestRunChangedEventArgs,
        direction: PathConversionDirection,
    ) -> TestRunChangedEventArgs {
        args.new_test_results = args
            .new_test_results
            .into_iter()
            .map(|r| self.update_test_result(r, direction))
            .collect();
        args.active_tests = self.update_test_cases(args.active_tests, direction);
        args
    }

    fn update_run_complete_args(
        &self,
        mut args: TestRunCompleteEventArgs,
        direction: PathConversionDirection,
    ) -> TestRunCompleteEventArgs {
        args.attachment_sets = self.update_attachment_sets(args.attachment_sets, direction);
        args
    }

    fn update_run_complete_payload(
        &self,
        mut payload: TestRunCompletePayload,
        direction: PathConversionDirection,
    ) -> TestRunCompletePayload {
        payload.test_run_complete_args = payload
            .test_run_complete_args
            .map(|a| self.update_run_complete_args(a, direction));
        payload.last_run_tests = payload
            .last_run_tests
            .map(|a| self.update_run_changed_args(a, direction));
        payload.run_attachments = self.update_attachment_sets(payload.run_attachments, direction);
        payload
    }

    fn update_discovery_complete_payload(
        &self,
        mut payload: DiscoveryCompletePayload,
        direction: PathConversionDirection,
    ) -> DiscoveryCompletePayload {
        payload.last_discovered_tests =
            self.update_test_cases(payload.last_discovered_tests, direction);
        payload
    }

    fn update_process_start_info(
        &self,
        mut info: TestProcessStartInfo,
        direction: PathConversionDirection,
    ) -> TestProcessStartInfo {
        info.file_name = self.update_path(info.file_name, direction);
        info.working_directory = self.update_optional_path(info.working_directory, direction);
        info
    }
}

/// Leaves every payload untouched.
///
/// Each conversion is overridden so that no field is visited at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPathConverter;

impl PathConverter for NullPathConverter {
    fn update_path(&self, path: String, _direction: PathConversionDirection) -> String {
        path
    }

    fn update_optional_path(
        &self,
        path: Option<String>,
        _direction: PathConversionDirection,
    ) -> Option<String> {
        path
    }

    fn update_paths(&self, paths: Vec<String>, _direction: PathConversionDirection) -> Vec<String> {
        paths
    }

    fn update_test_case(&self, test: TestCase, _direction: PathConversionDirection) -> TestCase {
        test
    }

    fn update_test_cases(
        &self,
        tests: Vec<TestCase>,
        _direction: PathConversionDirection,
    ) -> Vec<TestCase> {
        tests
    }

    fn update_test_result(
        &self,
        result: TestResult,
        _direction: PathConversionDirection,
    ) -> TestResult {
        result
    }

    fn update_attachment_sets(
        &self,
        sets: Vec<AttachmentSet>,
        _direction: PathConversionDirection,
    ) -> Vec<AttachmentSet> {
        sets
    }

    fn update_discovery_criteria(
        &self,
        criteria: DiscoveryCriteria,
        _direction: PathConversionDirection,
    ) -> DiscoveryCriteria {
        criteria
    }

    fn update_run_criteria_with_sources(
        &self,
        criteria: TestRunCriteriaWithSources,
        _direction: PathConversionDirection,
    ) -> TestRunCriteriaWithSources {
        criteria
    }

    fn update_run_criteria_with_tests(
        &self,
        criteria: TestRunCriteriaWithTests,
        _direction: PathConversionDirection,
    ) -> TestRunCriteriaWithTests {
        criteria
    }

    fn update_source_map(
        &self,
        map: BTreeMap<String, Vec<String>>,
        _direction: PathConversionDirection,
    ) -> BTreeMap<String, Vec<String>> {
        map
    }

    fn update_run_changed_args(
        &self,
        args: TestRunChangedEventArgs,
        _direction: PathConversionDirection,
    ) -> TestRunChangedEventArgs {
        args
    }

    fn update_run_complete_args(
        &self,
        args: TestRunCompleteEventArgs,
        _direction: PathConversionDirection,
    ) -> TestRunCompleteEventArgs {
        args
    }

    fn update_run_complete_payload(
        &self,
        payload: TestRunCompletePayload,
        _direction: PathConversionDirection,
    ) -> TestRunCompletePayload {
        payload
    }

    fn update_discovery_complete_payload(
        &self,
        payload: DiscoveryCompletePayload,
        _direction: PathConversionDirection,
    ) -> DiscoveryCompletePayload {
        payload
    }

    fn update_process_start_info(
        &self,
        info: TestProcessStartInfo,
        _direction: PathConversionDirection,
    ) -> TestProcessStartInfo {
        info
    }
}

/// Swaps a local prefix for a remote one and back.
///
/// Both prefixes are made absolute and given a trailing separator once, at
/// construction. Replacement is a literal substring replace, so paths that
/// do not contain the source prefix pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixPathConverter {
    local_path: String,
    remote_path: String,
}

impl PrefixPathConverter {
    /// `local_path` is the prefix as seen by this process, `remote_path` the
    /// same location as seen by the controller.
    pub fn new(local_path: impl AsRef<Path>, remote_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            local_path: normalize_prefix(local_path.as_ref(), "local")?,
            remote_path: normalize_prefix(remote_path.as_ref(), "remote")?,
        })
    }

    pub fn local_path(&self) -> &str {
        &self.local_path
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }
}

impl PathConverter for PrefixPathConverter {
    fn update_path(&self, path: String, direction: PathConversionDirection) -> String {
        let (from, to) = match direction {
            PathConversionDirection::Receive => (&self.remote_path, &self.local_path),
            PathConversionDirection::Send => (&self.local_path, &self.remote_path),
        };
        if path.contains(from.as_str()) {
            path.replace(from.as_str(), to)
        } else {
            path
        }
    }
}

fn normalize_prefix(path: &Path, which: &'static str) -> Result<String> {
    if path.as_os_str().is_empty() {
        return Err(ProtocolError::EmptyPathPrefix(which));
    }
    let absolute = std::path::absolute(path).map_err(|source| ProtocolError::InvalidPathPrefix {
        path: path.display().to_string(),
        source,
    })?;
    let mut prefix = absolute.to_string_lossy().into_owned();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::{TestOutcome, UriDataAttachment};
    use PathConversionDirection::{Receive, Send};

    fn converter() -> PrefixPathConverter {
        PrefixPathConverter::new("/deploy/app", "/home/dev/app").unwrap()
    }

    #[test]
    fn prefixes_get_trailing_separator() {
        let c = converter();
        assert_eq!(c.local_path(), "/deploy/app/");
        assert_eq!(c.remote_path(), "/home/dev/app/");
    }

    #[test]
    fn relative_prefix_is_made_absolute() {
        let c = PrefixPathConverter::new("relative/dir", "/remote").unwrap();
        assert!(Path::new(c.local_path()).is_absolute());
        assert!(c.local_path().ends_with("relative/dir/"));
    }

    #[test]
    fn empty_prefixes_rejected() {
        assert!(matches!(
            PrefixPathConverter::new("", "/remote"),
            Err(ProtocolError::EmptyPathPrefix("local"))
        ));
        assert!(matches!(
            PrefixPathConverter::new("/local", ""),
            Err(ProtocolError::EmptyPathPrefix("remote"))
        ));
    }

    #[test]
    fn direction_selects_prefix() {
        let c = converter();
        assert_eq!(
            c.update_path("/home/dev/app/bin/x.dll".to_string(), Receive),
            "/deploy/app/bin/x.dll"
        );
        assert_eq!(
            c.update_path("/deploy/app/bin/x.dll".to_string(), Send),
            "/home/dev/app/bin/x.dll"
        );
    }

    #[test]
    fn unrelated_paths_pass_through() {
        let c = converter();
        assert_eq!(c.update_path("/opt/other.dll".to_string(), Send), "/opt/other.dll");
        assert_eq!(c.update_path(String::new(), Receive), "");
    }

    #[test]
    fn send_then_receive_round_trips() {
        let c = converter();
        for p in [
            "/deploy/app/a.dll",
            "/deploy/app/nested/dir/b.dll",
            "/deploy/app/",
            "/deploy/app/with space/c.pdb",
        ] {
            let sent = c.update_path(p.to_string(), Send);
            assert_eq!(c.update_path(sent, Receive), p);
        }
    }

    #[test]
    fn null_converter_is_identity() {
        let c = NullPathConverter;
        for p in ["/deploy/app/a.dll", "", "relative", "C:\\x\\y"] {
            assert_eq!(c.update_path(p.to_string(), Send), p);
            assert_eq!(c.update_path(p.to_string(), Receive), p);
        }

        let criteria = TestRunCriteriaWithSources {
            adapter_source_map: BTreeMap::from([(
                "adapter".to_string(),
                vec!["/home/dev/app/x.dll".to_string()],
            )]),
            package: Some("/home/dev/app/pkg".to_string()),
            ..TestRunCriteriaWithSources::default()
        };
        assert_eq!(c.update_run_criteria_with_sources(criteria.clone(), Receive), criteria);
    }

    #[test]
    fn criteria_sources_and_package_are_received() {
        let criteria = TestRunCriteriaWithSources {
            adapter_source_map: BTreeMap::from([(
                "adapterA".to_string(),
                vec!["/home/dev/app/x.dll".to_string()],
            )]),
            package: Some("/home/dev/app/pkg.appx".to_string()),
            run_settings: Some("<RunSettings>/home/dev/app/</RunSettings>".to_string()),
            ..TestRunCriteriaWithSources::default()
        };
        let converted = converter().update_run_criteria_with_sources(criteria, Receive);
        assert_eq!(converted.adapter_source_map["adapterA"], vec!["/deploy/app/x.dll"]);
        assert_eq!(converted.package.as_deref(), Some("/deploy/app/pkg.appx"));
        assert_eq!(
            converted.run_settings.as_deref(),
            Some("<RunSettings>/home/dev/app/</RunSettings>")
        );
    }

    #[test]
    fn test_cases_tolerate_missing_code_file() {
        let test = TestCase::new("A.B", "executor://x", "/home/dev/app/a.dll");
        let converted = converter().update_test_case(test, Receive);
        assert_eq!(converted.source, "/deploy/app/a.dll");
        assert!(converted.code_file_path.is_none());
    }

    #[test]
    fn run_changed_args_rewrite_results_and_attachments() {
        let mut result = TestResult::new(
            TestCase::new("A.B", "executor://x", "/deploy/app/a.dll"),
            TestOutcome::Passed,
        );
        result.attachments = vec![AttachmentSet {
            uri: "datacollector://coverage".to_string(),
            display_name: "coverage".to_string(),
            attachments: vec![UriDataAttachment {
                uri: "/deploy/app/out/cov.xml".to_string(),
                description: String::new(),
            }],
        }];
        let args = TestRunChangedEventArgs {
            new_test_results: vec![result],
            active_tests: vec![TestCase::new("A.C", "executor://x", "/deploy/app/a.dll")],
            ..TestRunChangedEventArgs::default()
        };

        let converted = converter().update_run_changed_args(args, Send);
        let result = &converted.new_test_results[0];
        assert_eq!(result.test_case.source, "/home/dev/app/a.dll");
        assert_eq!(result.attachments[0].uri, "datacollector://coverage");
        assert_eq!(result.attachments[0].attachments[0].uri, "/home/dev/app/out/cov.xml");
        assert_eq!(converted.active_tests[0].source, "/home/dev/app/a.dll");
    }

    #[test]
    fn complete_payload_rewrites_every_section() {
        let payload = TestRunCompletePayload {
            test_run_complete_args: Some(TestRunCompleteEventArgs {
                attachment_sets: vec![AttachmentSet {
                    attachments: vec![UriDataAttachment {
                        uri: "/deploy/app/run.log".to_string(),
                        description: String::new(),
                    }],
                    ..AttachmentSet::default()
                }],
                ..TestRunCompleteEventArgs::default()
            }),
            last_run_tests: None,
            run_attachments: vec![AttachmentSet {
                attachments: vec![UriDataAttachment {
                    uri: "/deploy/app/merged.xml".to_string(),
                    description: String::new(),
                }],
                ..AttachmentSet::default()
            }],
            executor_uris: vec!["executor://x".to_string()],
        };

        let converted = converter().update_run_complete_payload(payload, Send);
        let args = converted.test_run_complete_args.unwrap();
        assert_eq!(args.attachment_sets[0].attachments[0].uri, "/home/dev/app/run.log");
        assert_eq!(converted.run_attachments[0].attachments[0].uri, "/home/dev/app/merged.xml");
        assert_eq!(converted.executor_uris, vec!["executor://x"]);
    }

    #[test]
    fn process_start_info_rewrites_file_and_directory() {
        let info = TestProcessStartInfo {
            file_name: "/deploy/app/testhost".to_string(),
            working_directory: Some("/deploy/app".to_string()),
            ..TestProcessStartInfo::default()
        };
        let converted = converter().update_process_start_info(info, Send);
        assert_eq!(converted.file_name, "/home/dev/app/testhost");
        // Without the trailing separator the prefix does not match.
        assert_eq!(converted.working_directory.as_deref(), Some("/deploy/app"));
    }
}
