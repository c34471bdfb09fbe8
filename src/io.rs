//! I/O seams: the async read trait the frame iterator consumes, and the
//! cancellable wait used at every blocking select point.

use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Async read seam for request bodies and captured byte runs.
///
/// Implemented by [Body](crate::stream::Body) (so the dryrun iterator can loop
/// a sender back on itself) and by byte slices (tests, captured bodies).
pub trait AsyncRead: Send {
    /// On ok, returns the bytes read; zero means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Read the exact number of bytes required to fill `buf`.
    ///
    /// Returns `UnexpectedEof` when the stream ends before the buffer fills.
    fn read_exact<'a>(
        &'a mut self, mut buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        async move {
            while !buf.is_empty() {
                match self.read(buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let tmp = buf;
                        buf = &mut tmp[n..];
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            if !buf.is_empty() {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "failed to fill whole buffer"))
            } else {
                Ok(())
            }
        }
    }
}

impl<T: AsyncRead> AsyncRead for &mut T {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        (**self).read(buf)
    }
}

impl AsyncRead for &[u8] {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        let n = self.len().min(buf.len());
        buf[..n].copy_from_slice(&self[..n]);
        *self = &self[n..];
        async move { Ok(n) }
    }
}

pin_project! {
    /// Polls `future`, aborting the wait when `cancel_future` resolves first.
    ///
    /// The cancel side is typically a close-channel `recv()`; its resolved
    /// value is discarded.
    pub struct Cancellable<F, C> {
        #[pin]
        future: F,
        #[pin]
        cancel_future: C,
    }
}

impl<F: Future + Send, C: Future + Send> Cancellable<F, C> {
    pub fn new(future: F, cancel_future: C) -> Self {
        Self { future, cancel_future }
    }
}

impl<F: Future + Send, C: Future + Send> Future for Cancellable<F, C> {
    type Output = Result<F::Output, ()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(output) = this.future.poll(cx) {
            return Poll::Ready(Ok(output));
        }
        if this.cancel_future.poll(cx).is_ready() {
            return Poll::Ready(Err(()));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slice_read_exact() {
        let data: Vec<u8> = (0u8..200).collect();
        let mut r: &[u8] = &data;
        let mut buf = [0u8; 64];
        r.read_exact(&mut buf).await.expect("read_exact");
        assert_eq!(&buf[..], &data[..64]);
        let n = r.read(&mut buf).await.expect("read");
        assert_eq!(n, 64);
        assert_eq!(&buf[..], &data[64..128]);
    }

    #[tokio::test]
    async fn test_cancellable() {
        let main = async { 7u32 };
        let never = std::future::pending::<()>();
        assert_eq!(Cancellable::new(main, never).await, Ok(7));

        let blocked = std::future::pending::<u32>();
        let now = async {};
        assert_eq!(Cancellable::new(blocked, now).await, Err(()));
    }
}
