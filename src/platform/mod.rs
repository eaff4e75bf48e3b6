//! Platform capability interfaces
//!
//! Every host facility the engine consumes — user accounts, the filesystem,
//! job grouping, disk quotas, port reservations, and the container host
//! agent — is abstracted behind a trait here. Windows-native backends live
//! outside this crate; the `Local*` implementations are portable backends
//! used by tests and degraded local mode.

pub mod fs;
pub mod host;
pub mod jobs;
pub mod net;
pub mod quota;
pub mod users;

pub use fs::{AccessRights, AccessRule, FileSystemManager, LocalFileSystem, Principal};
pub use host::{ContainerHostClient, ContainerHostService, LocalHostService};
pub use jobs::{JobObjectHandle, JobObjectManager, LocalJobObjectManager};
pub use net::{LocalTcpPortManager, TcpPortManager};
pub use quota::{LocalQuotaManager, QuotaControl, QuotaManager};
pub use users::{LogonToken, UserCredential, UserManager};
