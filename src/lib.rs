//! Streaming generation client for the Grok Imagine media service.
//!
//! Drives asynchronous media generation against the two channels the
//! service exposes: a duplex WebSocket that delivers progressively
//! higher-fidelity partial images, and a chunked HTTP event stream for
//! video jobs. The orchestrator classifies partial results into quality
//! stages, detects silently stalled jobs, retries across a pool of
//! interchangeable credentials with transport fallback, and offers both
//! single-shot and incremental consumption.
//!
//! ## Modules
//!
//! - [`orchestrator`]: retry/failover engine and the [`ImagineClient`] API
//! - [`job`]: per-attempt unit tracking and stage classification
//! - [`protocol`]: wire shapes for both channels
//! - [`transport`]: session building, proxy tunnels, impersonation
//! - [`credentials`] / [`storage`]: external collaborator contracts
//! - [`streaming`]: cancellable event-by-event consumption
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use imagine_client::{
//!     Credential, GenerationConfig, ImageRequest, ImagineClient, MemoryCredentialPool,
//! };
//!
//! # async fn demo() -> Result<(), imagine_client::ClientError> {
//! let pool = Arc::new(MemoryCredentialPool::new([Credential::new("sso-token")]));
//! let client = ImagineClient::new(GenerationConfig::from_env(), pool)?;
//! let outcome = client.generate_images(ImageRequest::new("a red fox"), None).await;
//! println!("{}", serde_json::to_string(&outcome).unwrap());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod protocol;
pub mod storage;
pub mod streaming;
pub mod transport;

mod image;
mod video;

pub use config::{GenerationConfig, RetryLimits, StageThresholds, StallWindows};
pub use credentials::{Credential, CredentialPool, MemoryCredentialPool};
pub use error::{
    ClientError, ClientResult, ErrorCode, GenerationFailure, GenerationSuccess, Outcome,
};
pub use image::ImageRequest;
pub use job::{ProgressUpdate, Stage};
pub use orchestrator::ImagineClient;
pub use protocol::VideoPreset;
pub use storage::{MediaStore, PassthroughStore};
pub use streaming::{GenerationStream, StreamEvent};
pub use video::VideoRequest;
