use chrono::{DateTime, Utc};

use fr_core::insight::Occurrence;

/// Summary statistics of the verify comparison.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct VerifySummary {
    pub instances_expected: usize,
    pub instances_actual: usize,
    /// Instances whose occurrence counts differ.
    pub count_mismatch: usize,
    pub oracle_total: usize,
    pub actual_total: usize,
    pub matched: usize,
    pub missing: usize,
    pub unexpected: usize,
    pub field_mismatch: usize,
}

/// Detail record for a missing or unexpected occurrence.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OccurrenceDetail {
    pub rule_instance_id: String,
    pub occurrence: Occurrence,
}

/// Detail record for an occurrence that exists on both sides but differs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MismatchDetail {
    pub rule_instance_id: String,
    pub started: DateTime<Utc>,
    /// Names of the differing fields.
    pub fields: Vec<String>,
    pub expected: Occurrence,
    pub actual: Occurrence,
}

/// Full verification report.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VerifyReport {
    pub status: String,
    pub summary: VerifySummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_details: Vec<OccurrenceDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected_details: Vec<OccurrenceDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatch_details: Vec<MismatchDetail>,
}

fn fmt_end(end: Option<DateTime<Utc>>) -> String {
    end.map_or_else(|| "open".to_string(), |t| t.to_rfc3339())
}

fn fmt_status(o: &Occurrence) -> &'static str {
    match (o.is_valid, o.is_faulted) {
        (false, _) => "invalid",
        (true, true) => "faulted",
        (true, false) => "healthy",
    }
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.status == "pass"
    }

    /// Render the report as a PR-friendly Markdown table.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("## fr-sim Verify Report\n\n");
        md.push_str(&format!("**Status**: {}\n\n", self.status.to_uppercase()));

        // Summary table
        md.push_str("### Summary\n\n");
        md.push_str("| Metric | Count |\n");
        md.push_str("|--------|-------|\n");
        md.push_str(&format!(
            "| Instances (oracle / actual) | {} / {} |\n",
            self.summary.instances_expected, self.summary.instances_actual
        ));
        md.push_str(&format!(
            "| Count mismatch | {} |\n",
            self.summary.count_mismatch
        ));
        md.push_str(&format!(
            "| Oracle total | {} |\n",
            self.summary.oracle_total
        ));
        md.push_str(&format!(
            "| Actual total | {} |\n",
            self.summary.actual_total
        ));
        md.push_str(&format!("| Matched | {} |\n", self.summary.matched));
        md.push_str(&format!("| Missing | {} |\n", self.summary.missing));
        md.push_str(&format!("| Unexpected | {} |\n", self.summary.unexpected));
        md.push_str(&format!(
            "| Field mismatch | {} |\n",
            self.summary.field_mismatch
        ));

        for (title, details) in [
            ("Missing", &self.missing_details),
            ("Unexpected", &self.unexpected_details),
        ] {
            if details.is_empty() {
                continue;
            }
            md.push_str(&format!("\n### {title} ({})\n\n", details.len()));
            md.push_str("| Instance | Started | Ended | Status | Text |\n");
            md.push_str("|----------|---------|-------|--------|------|\n");
            for d in details {
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {} |\n",
                    d.rule_instance_id,
                    d.occurrence.started.to_rfc3339(),
                    fmt_end(d.occurrence.ended),
                    fmt_status(&d.occurrence),
                    d.occurrence.text
                ));
            }
        }

        // Mismatch details
        if !self.mismatch_details.is_empty() {
            md.push_str(&format!(
                "\n### Field Mismatches ({})\n\n",
                self.mismatch_details.len()
            ));
            md.push_str("| Instance | Started | Fields | Expected | Actual |\n");
            md.push_str("|----------|---------|--------|----------|--------|\n");
            for d in &self.mismatch_details {
                md.push_str(&format!(
                    "| {} | {} | {} | {} until {} {:?} | {} until {} {:?} |\n",
                    d.rule_instance_id,
                    d.started.to_rfc3339(),
                    d.fields.join(", "),
                    fmt_status(&d.expected),
                    fmt_end(d.expected.ended),
                    d.expected.text,
                    fmt_status(&d.actual),
                    fmt_end(d.actual.ended),
                    d.actual.text
                ));
            }
        }

        md
    }
}
