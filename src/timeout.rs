//! Write deadline for a connection
//!
//! The deadline is armed by the first write after the connection was last
//! flushed and cleared by the next completed flush. Progress does not extend
//! it, so a peer draining one byte at a time still hits it. Reads pass
//! through untouched; request reads are bounded by hyper's header timer.

use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

pin_project! {
    /// Stream wrapper failing writes that outlive their deadline
    pub struct TimeoutIo<S> {
        #[pin]
        inner: S,
        write_timeout: Duration,
        write_deadline: Option<Pin<Box<Sleep>>>,
    }
}

impl<S> TimeoutIo<S> {
    pub fn new(inner: S, write_timeout: Duration) -> Self {
        Self {
            inner,
            write_timeout,
            write_deadline: None,
        }
    }
}

/// Arm the deadline if needed and fail once it has passed
fn check_deadline(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    cx: &mut Context<'_>,
) -> io::Result<()> {
    let timer = deadline.get_or_insert_with(|| Box::pin(sleep(timeout)));
    if timer.as_mut().poll(cx).is_ready() {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"));
    }
    Ok(())
}

impl<S: AsyncRead> AsyncRead for TimeoutIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for TimeoutIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        check_deadline(this.write_deadline, *this.write_timeout, cx)?;
        this.inner.poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        check_deadline(this.write_deadline, *this.write_timeout, cx)?;
        this.inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.write_deadline.is_none() {
            // Nothing written since the last flush
            return this.inner.poll_flush(cx);
        }
        check_deadline(this.write_deadline, *this.write_timeout, cx)?;
        let poll = this.inner.poll_flush(cx);
        if let Poll::Ready(Ok(())) = poll {
            *this.write_deadline = None;
        }
        poll
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        check_deadline(this.write_deadline, *this.write_timeout, cx)?;
        let poll = this.inner.poll_shutdown(cx);
        if poll.is_ready() {
            *this.write_deadline = None;
        }
        poll
    }
}
