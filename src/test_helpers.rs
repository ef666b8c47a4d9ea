use crate::api::RemoteSuite;
use crate::job::JobStatus;

/// Create a `RemoteSuite` carrying only an id and a status.
pub fn remote_suite(id: &str, status: JobStatus) -> RemoteSuite {
    RemoteSuite {
        id: id.to_string(),
        name: None,
        suite_type: None,
        status: Some(status),
        progress: None,
    }
}
