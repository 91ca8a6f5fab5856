//! Tandem Coordinator
//!
//! Drives one chat session by racing the push channel against the fallback
//! endpoint. `transition` holds every decision as a pure function; the
//! session actor runs it and carries out the timers, sends and fallback
//! calls it asks for.

pub mod config;
pub mod generation;
pub mod paths;
pub mod recovery;
pub mod session;
pub mod session_actor;
pub mod session_command;
pub mod settings;
pub mod timeline;
pub mod transition;

pub use config::{ConfigError, CoordinatorConfig, TimerCancelPolicy};
pub use generation::{GenerationRequest, RequestStatus, Transport};
pub use recovery::{FailureRecord, RecoveryManager};
pub use session::{ChatSession, SessionSnapshot, SubmitError, VisibleError};
pub use session_actor::{connect_session, SessionActorHandle};
pub use settings::{CompareSettings, SessionParams, SessionStore, SettingsError, StoredSession};
pub use timeline::{MessageId, MessageStatus, SubmissionId, Timeline, TimelineMessage};
pub use transition::{transition, Effect, Input, Outcome, SessionEvent};
