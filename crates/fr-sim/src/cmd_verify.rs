use std::path::PathBuf;

use anyhow::Context;

use fr_sim::output::jsonl::{read_insights_jsonl, read_timelines_jsonl};
use fr_sim::verify::{timelines_from_insights, verify};

pub(crate) fn run(expected: PathBuf, actual: PathBuf, format: String) -> anyhow::Result<()> {
    let expected_timelines = read_timelines_jsonl(&expected)
        .with_context(|| format!("reading expected: {}", expected.display()))?;
    let insights = read_insights_jsonl(&actual)
        .with_context(|| format!("reading actual: {}", actual.display()))?;

    let report = verify(&expected_timelines, &timelines_from_insights(insights));

    match format.as_str() {
        "markdown" | "md" => {
            println!("{}", report.to_markdown());
        }
        _ => {
            let json = serde_json::to_string_pretty(&report)?;
            println!("{}", json);
        }
    }

    if report.passed() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
