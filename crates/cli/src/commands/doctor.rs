use majordome_core::config::{AppConfig, LoadOptions};
use majordome_db::connect_with_settings;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('"', "\\\"")
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_oauth_clients(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "oauth_client_readiness",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            checks.push(DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// A service without an OAuth client still works for one-shot calls with an
/// already-valid token; the doctor reports which refreshers are armed.
fn check_oauth_clients(config: &AppConfig) -> DoctorCheck {
    let services = [
        ("hubspot", config.oauth.hubspot.is_configured()),
        ("slack", config.oauth.slack.is_configured()),
        ("trello", config.oauth.trello.is_configured()),
        ("google", config.oauth.google.is_configured()),
        ("quickbooks", config.oauth.quickbooks.is_configured()),
    ];
    let configured: Vec<&str> =
        services.iter().filter(|(_, ok)| *ok).map(|(name, _)| *name).collect();
    let missing: Vec<&str> =
        services.iter().filter(|(_, ok)| !*ok).map(|(name, _)| *name).collect();

    if missing.is_empty() {
        DoctorCheck {
            name: "oauth_client_readiness",
            status: CheckStatus::Pass,
            details: "every service has a refresher-capable OAuth client".to_string(),
        }
    } else {
        DoctorCheck {
            name: "oauth_client_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "configured: [{}]; background refresh disabled for: [{}]",
                configured.join(", "),
                missing.join(", ")
            ),
        }
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("could not start runtime: {error}"),
            };
        }
    };

    runtime.block_on(async {
        match connect_with_settings(&config.database.url, 1, 5).await {
            Ok(pool) => {
                let probe = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&pool).await;
                pool.close().await;
                match probe {
                    Ok(_) => DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Pass,
                        details: "database reachable and answering queries".to_string(),
                    },
                    Err(error) => DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("probe query failed: {error}"),
                    },
                }
            }
            Err(error) => DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("connection failed: {error}"),
            },
        }
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];
    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("  [{marker}] {} - {}", check.name, check.details));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{build_report, render_human, run, CheckStatus};

    #[test]
    fn report_always_contains_the_three_checks() {
        let report = build_report();
        let names: Vec<&str> = report.checks.iter().map(|check| check.name).collect();
        assert_eq!(
            names,
            vec!["config_validation", "oauth_client_readiness", "database_connectivity"]
        );
    }

    #[test]
    fn json_output_is_parseable() {
        let output = run(true);
        let payload: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert!(payload["checks"].is_array());
    }

    #[test]
    fn human_output_lists_every_check() {
        let report = build_report();
        let rendered = render_human(&report);
        assert!(rendered.contains("config_validation"));
        assert!(rendered.contains("database_connectivity"));
        let _ = matches!(report.overall_status, CheckStatus::Pass | CheckStatus::Fail);
    }
}
