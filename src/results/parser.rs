//! Tolerant JUnit-XML test report parsing.
//!
//! Build tools emit either a bare `<testsuite>` or a `<testsuites>` wrapper,
//! occasionally with invalid control characters mixed in. A malformed report
//! must never abort the overall build, so illegal characters are stripped
//! before parsing and a document that still fails to parse as either shape
//! yields an empty result set.

use std::sync::LazyLock;

use regex::Regex;
use roxmltree::{Document, Node};

use crate::results::{TestOutcome, TestReport};

/// Everything outside the XML-legal code points: tab, CR, LF, and the legal
/// Unicode ranges.
static ILLEGAL_XML_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\x09\x0A\x0D\x20-\x{D7FF}\x{E000}-\x{FFFD}\x{10000}-\x{10FFFF}]")
        .expect("illegal-character pattern is valid")
});

/// Parse one raw test report into normalized pass/fail lists.
pub fn parse_test_report(xml: &str) -> TestReport {
    let sanitized = ILLEGAL_XML_CHARS.replace_all(xml, "");

    let document = match Document::parse(&sanitized) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(error = %e, "Test report is not parseable XML, yielding no results");
            return TestReport::default();
        }
    };

    let root = document.root_element();
    let mut report = TestReport::default();

    if root.has_tag_name("testsuite") {
        collect_suite(root, &mut report);
        if !report.is_empty() {
            return report;
        }
    }

    if root.has_tag_name("testsuites") {
        for suite in root.children().filter(|n| n.has_tag_name("testsuite")) {
            collect_suite(suite, &mut report);
        }
    }

    report
}

fn collect_suite(suite: Node<'_, '_>, report: &mut TestReport) {
    for case in suite.children().filter(|n| n.has_tag_name("testcase")) {
        let name = case.attribute("name").unwrap_or("").to_string();

        // Skipped cases are neither passed nor failed.
        if child_element(case, "skipped").is_some() {
            continue;
        }

        let failure = child_element(case, "failure").or_else(|| child_element(case, "error"));
        match failure {
            Some(element) => {
                // Message attribute wins; an empty text node is coerced to
                // "", never treated as missing.
                let message = element
                    .attribute("message")
                    .map(str::to_string)
                    .or_else(|| element.text().map(str::to_string))
                    .unwrap_or_default();
                report.failed.push(TestOutcome::failed(name, message));
            }
            None => report.successful.push(TestOutcome::passed(name)),
        }
    }
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_suite_with_failure_and_pass() {
        let xml = r#"
            <testsuite name="Tests">
                <testcase name="testAdd">
                    <failure message="expected 2 but was 3"/>
                </testcase>
                <testcase name="testSub"/>
            </testsuite>"#;
        let report = parse_test_report(xml);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "testAdd");
        assert_eq!(report.failed[0].messages, vec!["expected 2 but was 3"]);
        assert_eq!(report.successful.len(), 1);
        assert_eq!(report.successful[0].name, "testSub");
        assert!(report.successful[0].messages.is_empty());
    }

    #[test]
    fn testsuites_wrapper_concatenates() {
        let xml = r#"
            <testsuites>
                <testsuite name="A">
                    <testcase name="a1"><failure message="boom"/></testcase>
                    <testcase name="a2"/>
                </testsuite>
                <testsuite name="B">
                    <testcase name="b1"><failure message="bang"/></testcase>
                    <testcase name="b2"/>
                </testsuite>
            </testsuites>"#;
        let report = parse_test_report(xml);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.successful.len(), 2);
        assert_eq!(report.failed[0].name, "a1");
        assert_eq!(report.failed[1].name, "b1");
    }

    #[test]
    fn message_attribute_wins_over_text() {
        let xml = r#"
            <testsuite>
                <testcase name="t">
                    <failure message="attribute">text body</failure>
                </testcase>
            </testsuite>"#;
        let report = parse_test_report(xml);
        assert_eq!(report.failed[0].messages, vec!["attribute"]);
    }

    #[test]
    fn message_falls_back_to_text() {
        let xml = r#"
            <testsuite>
                <testcase name="t">
                    <failure>text body</failure>
                </testcase>
            </testsuite>"#;
        let report = parse_test_report(xml);
        assert_eq!(report.failed[0].messages, vec!["text body"]);
    }

    #[test]
    fn empty_failure_element_yields_empty_message() {
        let xml = r#"
            <testsuite>
                <testcase name="t"><failure></failure></testcase>
            </testsuite>"#;
        let report = parse_test_report(xml);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].messages, vec![String::new()]);
    }

    #[test]
    fn error_element_counts_as_failure() {
        let xml = r#"
            <testsuite>
                <testcase name="t"><error message="kaboom"/></testcase>
            </testsuite>"#;
        let report = parse_test_report(xml);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].messages, vec!["kaboom"]);
    }

    #[test]
    fn skipped_case_is_excluded_from_both_lists() {
        let xml = r#"
            <testsuite>
                <testcase name="t"><skipped/></testcase>
                <testcase name="u"/>
            </testsuite>"#;
        let report = parse_test_report(xml);
        assert!(report.failed.is_empty());
        assert_eq!(report.successful.len(), 1);
        assert_eq!(report.successful[0].name, "u");
    }

    #[test]
    fn invalid_control_characters_are_stripped() {
        let xml = "<testsuite>\u{0}\u{8}<testcase name=\"t\u{b}\"/></testsuite>";
        let report = parse_test_report(xml);
        assert_eq!(report.successful.len(), 1);
        assert_eq!(report.successful[0].name, "t");
    }

    #[test]
    fn unparseable_report_yields_empty_results() {
        let report = parse_test_report("this is not xml <<<");
        assert!(report.is_empty());
    }

    #[test]
    fn empty_testsuites_wrapper_yields_empty_results() {
        let report = parse_test_report("<testsuites></testsuites>");
        assert!(report.is_empty());
    }
}
