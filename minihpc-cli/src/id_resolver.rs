//! ID resolver module
//!
//! Resolves job ID prefixes to full UUIDs against a set of known jobs, so users
//! can type a short, unambiguous prefix instead of the whole ID.

use anyhow::{Result, anyhow};
use minihpc_core::domain::job::Job;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job ID or prefix against `jobs`
///
/// A full UUID is returned as-is, even if it is not in `jobs`; the caller
/// decides what an unknown ID means.
///
/// # Returns
/// `Ok(None)` when no job matches the prefix
///
/// # Errors
/// Returns an error if multiple jobs match the prefix (ambiguous)
pub fn resolve_job_id(jobs: &[Job], id_or_prefix: &IdOrPrefix) -> Result<Option<Uuid>> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Full(uuid) => return Ok(Some(*uuid)),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    if prefix.is_empty() {
        return Err(anyhow!("Job ID cannot be empty"));
    }

    let matches: Vec<&Job> = jobs
        .iter()
        .filter(|j| j.id.to_string().starts_with(prefix.as_str()))
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [job] => Ok(Some(job.id)),
        _ => {
            let ids: Vec<String> = matches.iter().map(|j| j.id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minihpc_core::dto::job::CreateJob;

    fn job_with_id(id: &str) -> Job {
        let mut job = Job::new(CreateJob {
            name: None,
            image: "alpine".to_string(),
            command: "true".to_string(),
            cpu: 1,
            memory: 1,
        });
        job.id = Uuid::parse_str(id).unwrap();
        job
    }

    fn jobs() -> Vec<Job> {
        vec![
            job_with_id("aaaa1111-0000-4000-8000-000000000001"),
            job_with_id("aaaa2222-0000-4000-8000-000000000002"),
            job_with_id("bbbb3333-0000-4000-8000-000000000003"),
        ]
    }

    #[test]
    fn test_unique_prefix() {
        let resolved = resolve_job_id(&jobs(), &IdOrPrefix::parse("bbbb")).unwrap();
        assert_eq!(
            resolved,
            Some(Uuid::parse_str("bbbb3333-0000-4000-8000-000000000003").unwrap())
        );
    }

    #[test]
    fn test_ambiguous_prefix() {
        let err = resolve_job_id(&jobs(), &IdOrPrefix::parse("aaaa")).unwrap_err();
        assert!(err.to_string().contains("Ambiguous prefix 'aaaa'"));
    }

    #[test]
    fn test_unknown_prefix() {
        assert_eq!(
            resolve_job_id(&jobs(), &IdOrPrefix::parse("cccc")).unwrap(),
            None
        );
    }

    #[test]
    fn test_unmatched_prefix_and_unqueued_uuid_both_resolve_without_error() {
        let pending = jobs();
        let by_prefix = resolve_job_id(&pending, &IdOrPrefix::parse("ffff"));
        let by_uuid = resolve_job_id(&pending, &IdOrPrefix::Full(Uuid::new_v4()));

        assert!(matches!(by_prefix, Ok(None)));
        assert!(matches!(by_uuid, Ok(Some(id)) if !pending.iter().any(|j| j.id == id)));
    }

    #[test]
    fn test_full_uuid_passes_through() {
        let id = Uuid::new_v4();
        assert_eq!(
            resolve_job_id(&[], &IdOrPrefix::Full(id)).unwrap(),
            Some(id)
        );
    }

    #[test]
    fn test_empty_prefix_rejected() {
        assert!(resolve_job_id(&jobs(), &IdOrPrefix::parse("")).is_err());
    }
}
