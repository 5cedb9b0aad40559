use crate::store::Store;
use chrono::prelude::*;
use colored::*;
use patchgate_common::errors::*;
use std::fmt::Write;
use std::time::Duration;

/// Human readable dump of the orchestrator state
pub fn render(store: &Store) -> Result<String> {
    render_at(store, Utc::now())
}

pub fn render_at(store: &Store, now: DateTime<Utc>) -> Result<String> {
    let mut out = String::new();

    for repo in store.repo_info()? {
        writeln!(out, "{}", repo.url.bold())?;
        match &repo.stable {
            Some(stable) => writeln!(out, "  stable: {} ({})", stable.commit_id.green(), stable.commit_date)?,
            None => writeln!(out, "  stable: {}", "none".red())?,
        }
        if let Some((latest, result)) = &repo.latest {
            writeln!(out, "  latest: {} ({}) {}", latest.commit_id, latest.commit_date, result.fancy())?;
        }
    }

    for (source, last) in store.list_patch_sources()? {
        let last = last
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(out, "{} project {}: last patch {}", source.baseurl, source.project_id, last)?;
    }

    let jobs = store.list_pending_jobs()?;
    writeln!(out, "{} pending jobs", jobs.len())?;
    for job in jobs {
        let patches = store.patches_for_job(job.id)?;
        let kind = if patches.is_empty() {
            "baseline".to_string()
        } else {
            match store.pending_since(job.id)? {
                Some(since) => {
                    let age = Duration::from_secs((now.timestamp() - since).max(0) as u64);
                    format!("patches {:?}, pending for {}", patches, humantime::format_duration(age))
                }
                None => format!("patches {:?}", patches),
            }
        };
        writeln!(out, "  {} build {} #{}: {}", job.id, job.job_name, job.build_id, kind)?;
    }

    let (patches, pending, runs) = store.counts()?;
    writeln!(out, "{} patches seen, {} pending, {} test runs", patches, pending, runs)?;

    Ok(out)
}
