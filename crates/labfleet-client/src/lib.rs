//! labfleet-client: HTTP client library for the labfleet daemon
//!
//! # Example
//!
//! ```no_run
//! use labfleet_client::HttpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new("http://localhost:8000")?;
//!
//! let health = client.health().await?;
//! println!("Status: {}", health.status);
//!
//! for (id, device) in client.list_devices().await?.duts {
//!     println!("{id}: {} {}", device.full_name, device.state);
//! }
//!
//! let device = client
//!     .submit_job(std::fs::read_to_string("job.yml")?, 4242)
//!     .tag("board:rpi4")
//!     .send()
//!     .await?;
//! println!("dispatched to {device}");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod http;

pub use error::{ClientError, Result};
pub use http::{HttpClient, SubmitJobBuilder};
