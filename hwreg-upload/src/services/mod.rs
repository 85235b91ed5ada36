//! Services for hwreg-upload

pub mod clock;
pub mod credentials;
pub mod duplicate_checker;
pub mod field_aliases;
pub mod local_identity;
pub mod record_source;
pub mod registry_client;
pub mod result_aggregator;
pub mod submission_engine;
pub mod upload_supervisor;

pub use clock::{Sleeper, TokioSleeper};
pub use credentials::{Credential, CredentialError, CredentialProvider, StaticCredentialProvider};
pub use duplicate_checker::DuplicateChecker;
pub use local_identity::{
    CommandIdentitySource, LocalIdentity, LocalIdentityError, LocalIdentitySource,
    UnavailableIdentitySource,
};
pub use record_source::{RecordInput, RecordSource, ResolvedRecords, SourceError};
pub use registry_client::{
    DevicePage, DeviceRegistry, GraphRegistryClient, ImportStatus, ImportTicket,
    RegisteredDevice, RegistryError,
};
pub use submission_engine::{EngineRun, UploadEngine};
pub use upload_supervisor::{
    Pipeline, RunHandle, RunInterrupted, SupervisorError, SupervisorStatus, UploadRequest,
    UploadSupervisor,
};
