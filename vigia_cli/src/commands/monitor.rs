//! Admin monitor command

use anyhow::Result;
use console::style;
use vigia_common::{constants, MonitorSnapshot};

/// Fetch and print the monitor snapshot
pub async fn run(base_url: &str, token: &str) -> Result<()> {
    let endpoint = format!("{}{}", base_url.trim_end_matches('/'), constants::MONITOR_PATH);
    tracing::debug!("Fetching {}", endpoint);

    let client = reqwest::Client::new();
    let response = client
        .get(&endpoint)
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("Failed to fetch monitor: {} - {}", status, text);
    }

    let snapshot: MonitorSnapshot = response.json().await?;
    print!("{}", render(&snapshot));
    Ok(())
}

fn render(snapshot: &MonitorSnapshot) -> String {
    let mut out = String::new();
    let line = |out: &mut String, label: &str, value: String| {
        out.push_str(&format!("  {:<24} {}\n", style(label).dim(), value));
    };

    out.push_str(&format!("{}\n", style("Counters").bold()));
    line(&mut out, "Tracked identities", snapshot.tracked_identities.to_string());
    line(&mut out, "Identity/origin pairs", snapshot.tracked_pairs.to_string());
    line(&mut out, "Rate-limited origins", snapshot.rate_limited_origins.to_string());
    line(&mut out, "Cached classifications", snapshot.cached_classifications.to_string());
    line(&mut out, "Near identity limit", snapshot.near_limit_identities.to_string());
    line(&mut out, "Multi-origin identities", snapshot.multi_origin_identities.to_string());

    out.push_str(&format!("\n{}\n", style("Rejections").bold()));
    line(&mut out, "Identity limit", snapshot.rejections.identity_limit.to_string());
    line(&mut out, "Origin limit", snapshot.rejections.origin_limit.to_string());
    line(&mut out, "Attack detected", snapshot.rejections.attack.to_string());
    line(&mut out, "Banned origin", snapshot.rejections.banned.to_string());

    out.push_str(&format!("\n{} ({})\n", style("Bans").bold(), snapshot.bans.len()));
    if snapshot.bans.is_empty() {
        out.push_str(&format!("  {}\n", style("none").dim()));
    }
    for ban in &snapshot.bans {
        out.push_str(&format!(
            "  {:<24} {}\n",
            style(&ban.origin).red(),
            format_remaining(ban.expires_in_secs)
        ));
    }

    out.push_str(&format!("\n{}\n", style("Top identities").bold()));
    if snapshot.top_identities.is_empty() {
        out.push_str(&format!("  {}\n", style("none").dim()));
    }
    for identity in &snapshot.top_identities {
        out.push_str(&format!(
            "  {:<12} {:>4} attempts  {:>3} origins\n",
            style(&identity.identity).cyan(),
            identity.attempts,
            identity.distinct_origins
        ));
    }

    out
}

fn format_remaining(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigia_common::{BanEntry, IdentityActivity, RejectionTotals};

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(45), "45s");
        assert_eq!(format_remaining(125), "2m 05s");
        assert_eq!(format_remaining(3_660), "1h 01m");
    }

    #[test]
    fn test_render_lists_bans_and_identities() {
        console::set_colors_enabled(false);
        let snapshot = MonitorSnapshot {
            generated_at_unix: 1_700_000_000,
            bans: vec![BanEntry {
                origin: "203.0.113.9".to_string(),
                expires_in_secs: 1800,
            }],
            tracked_identities: 4,
            tracked_pairs: 6,
            rate_limited_origins: 10,
            cached_classifications: 12,
            top_identities: vec![IdentityActivity {
                identity: "ab12cd34…".to_string(),
                attempts: 17,
                distinct_origins: 2,
            }],
            near_limit_identities: 1,
            multi_origin_identities: 1,
            rejections: RejectionTotals {
                attack: 1,
                ..Default::default()
            },
        };

        let out = render(&snapshot);
        assert!(out.contains("203.0.113.9"));
        assert!(out.contains("30m 00s"));
        assert!(out.contains("ab12cd34…"));
        assert!(out.contains("17 attempts"));
        assert!(out.contains("Bans (1)"));
    }
}
