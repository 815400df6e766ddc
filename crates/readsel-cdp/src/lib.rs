//! Chrome DevTools Protocol backend for readsel.
//!
//! Connects to a Chromium-based browser started with remote debugging,
//! attaches to the reading page and exposes it as a
//! [`HostDocument`](readsel_core::HostDocument).
//!
//! ## Usage
//!
//! 1. Start the browser with remote debugging:
//!    ```bash
//!    chrome --remote-debugging-port=9222
//!    ```
//!
//! 2. Attach and augment:
//!    ```rust,ignore
//!    let client = CdpClient::connect("http://localhost:9222").await?;
//!    let page = client.find_page("zhihu.com").await?;
//!    let document = CdpDocument::attach(client.attach_page(&page.id).await?).await?;
//!    let augmenter = Augmenter::new(Arc::new(document), settings);
//!    ```

pub mod bridge;
mod client;
mod document;
mod error;
mod protocol;
mod session;

pub use client::CdpClient;
pub use document::CdpDocument;
pub use error::CdpError;
pub use protocol::*;
pub use session::PageSession;
