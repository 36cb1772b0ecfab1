use serde::Serialize;
use skillevo_core::{
    AnalyzerConfig, EventAction, EventResult, Finding, FindingKind, Timestamp, UsageEvent,
};
use std::collections::BTreeMap;

use crate::corpus::SkillDescriptor;

/// Per-target aggregates over one analysis window.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SkillMetrics {
    pub skill: String,
    pub invocation_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub skip_count: u64,
    pub avg_duration_ms: f64,
    pub last_invoked: Option<Timestamp>,
    /// Distinct error texts seen on failed invocations.
    pub error_samples: Vec<String>,
    /// Reasons attached to skipped events.
    pub skip_reasons: Vec<String>,
}

impl SkillMetrics {
    /// Success rate in percent over completed invocations. Zero when the
    /// target was never invoked.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    SuccessRate,
    SkipCount,
    InvocationCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Below,
    AtLeast,
    Equals,
}

/// One declarative usage rule: metric, comparator, threshold. Adding a rule
/// never touches the aggregation pass.
#[derive(Debug, Clone)]
struct UsageRule {
    kind: FindingKind,
    metric: Metric,
    cmp: Comparator,
    threshold: f64,
    /// Targets with fewer invocations are exempt (sparse-data guard).
    min_invocations: u64,
}

impl UsageRule {
    fn evaluate(&self, metrics: &SkillMetrics) -> Option<f64> {
        if metrics.invocation_count < self.min_invocations {
            return None;
        }
        let value = match self.metric {
            Metric::SuccessRate => metrics.success_rate(),
            Metric::SkipCount => metrics.skip_count as f64,
            Metric::InvocationCount => metrics.invocation_count as f64,
        };
        let crossed = match self.cmp {
            Comparator::Below => value < self.threshold,
            Comparator::AtLeast => value >= self.threshold,
            Comparator::Equals => value == self.threshold,
        };
        crossed.then_some(value)
    }
}

/// Pure pattern analyzer: the same events, corpus, and window always yield
/// the same findings. No side effects; the classifier consumes the output
/// directly.
pub struct Analyzer {
    config: AnalyzerConfig,
    rules: Vec<UsageRule>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let rules = vec![
            UsageRule {
                kind: FindingKind::LowSuccessRate,
                metric: Metric::SuccessRate,
                cmp: Comparator::Below,
                threshold: config.success_rate_threshold,
                min_invocations: config.min_sample_size,
            },
            UsageRule {
                kind: FindingKind::RepeatedSkips,
                metric: Metric::SkipCount,
                cmp: Comparator::AtLeast,
                threshold: config.skip_threshold as f64,
                min_invocations: 0,
            },
            UsageRule {
                kind: FindingKind::Unused,
                metric: Metric::InvocationCount,
                cmp: Comparator::Equals,
                threshold: 0.0,
                min_invocations: 0,
            },
        ];
        Self { config, rules }
    }

    /// Group events by target and compute aggregates. Only corpus members
    /// get an entry; events for unknown targets are ignored.
    pub fn aggregate(
        &self,
        events: &[UsageEvent],
        corpus: &[SkillDescriptor],
    ) -> BTreeMap<String, SkillMetrics> {
        let mut metrics: BTreeMap<String, SkillMetrics> = corpus
            .iter()
            .map(|d| {
                (
                    d.name.clone(),
                    SkillMetrics {
                        skill: d.name.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect();

        for event in events {
            let Some(m) = metrics.get_mut(&event.skill) else {
                continue;
            };
            match event.action {
                EventAction::Invoked => {
                    m.invocation_count += 1;
                    m.last_invoked = Some(match m.last_invoked {
                        Some(prev) if prev > event.timestamp => prev,
                        _ => event.timestamp,
                    });
                    match event.result {
                        Some(EventResult::Success) => m.success_count += 1,
                        _ => {
                            m.failure_count += 1;
                            if let Some(error) = &event.error {
                                if !m.error_samples.contains(error) {
                                    m.error_samples.push(error.clone());
                                }
                            }
                        }
                    }
                    if let Some(duration) = event.duration_ms {
                        let total =
                            m.avg_duration_ms * (m.invocation_count - 1) as f64 + duration as f64;
                        m.avg_duration_ms = total / m.invocation_count as f64;
                    }
                }
                EventAction::Skipped => {
                    m.skip_count += 1;
                    if let Some(reason) = &event.reason {
                        m.skip_reasons.push(reason.clone());
                    }
                }
                EventAction::Snapshot | EventAction::EvolutionApplied => {}
            }
        }

        metrics
    }

    /// Full analysis pass: window the events, aggregate, and evaluate every
    /// rule per target. Findings for the same target pass through unmerged;
    /// cross-run dedup is the proposal store's one-open-proposal invariant.
    pub fn analyze(
        &self,
        events: &[UsageEvent],
        corpus: &[SkillDescriptor],
        from: Timestamp,
        to: Timestamp,
    ) -> Vec<Finding> {
        let windowed: Vec<UsageEvent> = events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect();
        let metrics = self.aggregate(&windowed, corpus);
        let window_days = (to - from).num_days().max(1);

        let mut findings = Vec::new();
        for descriptor in corpus {
            let Some(m) = metrics.get(&descriptor.name) else {
                continue;
            };
            findings.extend(self.usage_findings(m, window_days));
            findings.extend(self.content_findings(descriptor));
        }
        findings
    }

    fn usage_findings(&self, metrics: &SkillMetrics, window_days: i64) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rule in &self.rules {
            let Some(value) = rule.evaluate(metrics) else {
                continue;
            };
            let (summary, evidence) = match rule.kind {
                FindingKind::LowSuccessRate => (
                    format!(
                        "Success rate {:.1}% over {} invocations",
                        value, metrics.invocation_count
                    ),
                    metrics.error_samples.iter().take(3).cloned().collect(),
                ),
                FindingKind::RepeatedSkips => (
                    format!("Skipped {} times within the window", metrics.skip_count),
                    metrics.skip_reasons.iter().take(5).cloned().collect(),
                ),
                FindingKind::Unused => (
                    format!("Not invoked in the past {} days", window_days),
                    Vec::new(),
                ),
                _ => continue,
            };
            findings.push(Finding {
                kind: rule.kind,
                skill: metrics.skill.clone(),
                metric: value,
                summary,
                evidence,
            });
        }
        findings
    }

    fn content_findings(&self, descriptor: &SkillDescriptor) -> Vec<Finding> {
        let mut findings = Vec::new();

        if !descriptor.has_evolution_metadata {
            findings.push(Finding {
                kind: FindingKind::MissingMetadata,
                skill: descriptor.name.clone(),
                metric: 0.0,
                summary: "Document lacks the evolution metadata block".into(),
                evidence: Vec::new(),
            });
        }

        let missing: Vec<String> = self
            .config
            .required_sections
            .iter()
            .filter(|s| !descriptor.headings.contains(*s))
            .cloned()
            .collect();
        if !missing.is_empty() {
            findings.push(Finding {
                kind: FindingKind::MissingSection,
                skill: descriptor.name.clone(),
                metric: missing.len() as f64,
                summary: format!("Missing required sections: {}", missing.join(", ")),
                evidence: missing,
            });
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skillevo_core::types::now;
    use std::path::PathBuf;

    fn descriptor(name: &str) -> SkillDescriptor {
        SkillDescriptor {
            name: name.to_string(),
            path: PathBuf::from(name),
            version: Some("1.0.0".parse().unwrap()),
            has_evolution_metadata: true,
            evolution_enabled: true,
            headings: vec![
                "Out of Scope".into(),
                "Verification".into(),
                "Integrations".into(),
            ],
        }
    }

    fn invocation(skill: &str, result: EventResult) -> UsageEvent {
        UsageEvent {
            timestamp: now(),
            session_id: None,
            skill: skill.into(),
            action: EventAction::Invoked,
            result: Some(result),
            duration_ms: Some(100),
            error: if result == EventResult::Failure {
                Some("trigger mismatch".into())
            } else {
                None
            },
            reason: None,
            skill_count: None,
            skills: None,
            version_before: None,
            version_after: None,
            change_level: None,
            description: None,
        }
    }

    fn skip(skill: &str) -> UsageEvent {
        UsageEvent {
            action: EventAction::Skipped,
            result: None,
            reason: Some("phrase not matched".into()),
            ..invocation(skill, EventResult::Success)
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalyzerConfig::default())
    }

    fn window() -> (Timestamp, Timestamp) {
        let to = now() + Duration::minutes(1);
        (to - Duration::days(7), to)
    }

    #[test]
    fn test_low_success_rate_finding() {
        // 6 invocations, 1 success: rate ~16.7%, sample size over minimum.
        let mut events = vec![invocation("doc-x", EventResult::Success)];
        for _ in 0..5 {
            events.push(invocation("doc-x", EventResult::Failure));
        }

        let (from, to) = window();
        let findings = analyzer().analyze(&events, &[descriptor("doc-x")], from, to);
        let low: Vec<_> = findings
            .iter()
            .filter(|f| f.kind == FindingKind::LowSuccessRate)
            .collect();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].skill, "doc-x");
        assert!((low[0].metric - 100.0 / 6.0).abs() < 0.1);
    }

    #[test]
    fn test_sparse_data_exempt_from_success_rate_rule() {
        // 4 invocations, all failures: 0% success but below min sample size.
        let events: Vec<_> = (0..4)
            .map(|_| invocation("doc-x", EventResult::Failure))
            .collect();

        let (from, to) = window();
        let findings = analyzer().analyze(&events, &[descriptor("doc-x")], from, to);
        assert!(!findings
            .iter()
            .any(|f| f.kind == FindingKind::LowSuccessRate));
    }

    #[test]
    fn test_repeated_skips_threshold() {
        let events: Vec<_> = (0..3).map(|_| skip("doc-x")).collect();
        let (from, to) = window();
        let findings = analyzer().analyze(&events, &[descriptor("doc-x")], from, to);
        let skips: Vec<_> = findings
            .iter()
            .filter(|f| f.kind == FindingKind::RepeatedSkips)
            .collect();
        assert_eq!(skips.len(), 1);
        assert_eq!(skips[0].metric, 3.0);
        assert_eq!(skips[0].evidence.len(), 3);
    }

    #[test]
    fn test_unused_and_content_rules() {
        let mut quiet = descriptor("quiet");
        quiet.has_evolution_metadata = false;
        quiet.headings = vec!["Verification".into()];

        let (from, to) = window();
        let findings = analyzer().analyze(&[], &[quiet], from, to);
        let kinds: Vec<_> = findings.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FindingKind::Unused));
        assert!(kinds.contains(&FindingKind::MissingMetadata));
        assert!(kinds.contains(&FindingKind::MissingSection));

        let missing = findings
            .iter()
            .find(|f| f.kind == FindingKind::MissingSection)
            .unwrap();
        assert_eq!(missing.evidence, vec!["Out of Scope", "Integrations"]);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let mut events = vec![invocation("doc-x", EventResult::Success)];
        for _ in 0..5 {
            events.push(invocation("doc-x", EventResult::Failure));
        }
        events.push(skip("doc-y"));

        let corpus = vec![descriptor("doc-x"), descriptor("doc-y")];
        let (from, to) = window();
        let first = analyzer().analyze(&events, &corpus, from, to);
        let second = analyzer().analyze(&events, &corpus, from, to);
        assert_eq!(first, second);
    }

    #[test]
    fn test_events_outside_window_ignored() {
        let mut old = invocation("doc-x", EventResult::Failure);
        old.timestamp = now() - Duration::days(30);
        let events = vec![old];

        let (from, to) = window();
        let metrics = analyzer().aggregate(
            &events
                .iter()
                .filter(|e| e.timestamp >= from && e.timestamp <= to)
                .cloned()
                .collect::<Vec<_>>(),
            &[descriptor("doc-x")],
        );
        assert_eq!(metrics["doc-x"].invocation_count, 0);
    }
}
