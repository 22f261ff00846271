//! Services module for disclosure-service.

pub mod access;
pub mod agreements;
pub mod audit;
pub mod database;
pub mod document;
pub mod error;
pub mod fees;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod projection;
pub mod store;
pub mod verification;

pub use access::{AccessLevelResolver, AccessResolution};
pub use agreements::{ConfidentialityAgreementManager, DraftRequest, PendingSignature};
pub use audit::AccessAuditLogger;
pub use database::Database;
pub use document::{DocumentGenerator, PlainTextDocumentGenerator};
pub use error::ServiceError;
pub use fees::{FeeCalculator, FeeSchedule, PackageType, PlatformFees};
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{
    ChannelDispatcher, DispatchError, DocumentAttachment, NotificationDispatcher,
    NotificationPayload, Recipients, RecordingDispatcher, SentNotification,
};
pub use projection::ProjectViewProjector;
pub use store::DisclosureStore;
pub use verification::{IssuedChallenge, VerificationChallengeService};
