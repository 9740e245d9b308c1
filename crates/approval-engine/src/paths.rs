//! On-disk layout of the file store
use approval_types::{DefinitionId, InstanceId, RequestId, RequestStatus};
use std::path::{Path, PathBuf};

// Directory names (relative to the data root)
pub const DEFINITIONS_DIR_NAME: &str = "definitions";
pub const INSTANCES_DIR_NAME: &str = "instances";
pub const REQUESTS_DIR_NAME: &str = "requests";
pub const HISTORY_DIR_NAME: &str = "history";
pub const TMP_DIR_NAME: &str = ".tmp";

/// Request status directories, searched in this order
pub const REQUEST_STATES: [RequestStatus; 4] = [
    RequestStatus::Pending,
    RequestStatus::Approved,
    RequestStatus::Rejected,
    RequestStatus::Skipped,
];

/// Path builder rooted at the configured data directory
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn definitions_dir(&self) -> PathBuf {
        self.root.join(DEFINITIONS_DIR_NAME)
    }

    pub fn definition_file(&self, id: &DefinitionId) -> PathBuf {
        self.definitions_dir().join(format!("definition_{}.json", id))
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join(INSTANCES_DIR_NAME)
    }

    pub fn instance_file(&self, id: &InstanceId) -> PathBuf {
        self.instances_dir().join(format!("instance_{}.json", id))
    }

    /// A request's status is the directory it lives in
    pub fn request_state_dir(&self, status: RequestStatus) -> PathBuf {
        self.root.join(REQUESTS_DIR_NAME).join(status.as_str())
    }

    pub fn request_file(&self, status: RequestStatus, id: &RequestId) -> PathBuf {
        self.request_state_dir(status).join(format!("request_{}.json", id))
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join(HISTORY_DIR_NAME)
    }

    pub fn history_file(&self, instance_id: &InstanceId) -> PathBuf {
        self.history_dir().join(format!("history_{}.jsonl", instance_id))
    }

    /// Staging area for atomic writes; same filesystem as the data so rename is atomic
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR_NAME)
    }

    pub fn all_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.definitions_dir(),
            self.instances_dir(),
            self.history_dir(),
            self.tmp_dir(),
        ];
        dirs.extend(REQUEST_STATES.iter().map(|s| self.request_state_dir(*s)));
        dirs
    }
}
