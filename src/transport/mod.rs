//! Bidirectional, closeable byte streams the RPC layer runs over.
//!
//! - `pipe`: a child's stdin/stdout plus its process handle.
//! - `stdio`: this process's own stdin/stdout, used when it is the plugin.

pub mod pipe;
pub mod stdio;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::Result;

pub use pipe::PipeTransport;
pub use stdio::StdioStream;

/// A byte stream with an explicit, fallible close.
///
/// Owned by exactly one RPC client or server at a time.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Release every resource behind the stream.
    ///
    /// Calling `close` again must not panic or hang; it may report that the
    /// resources are already closed.
    ///
    /// # Errors
    ///
    /// Returns the failure reported while releasing the resources.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
