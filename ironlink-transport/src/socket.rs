/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Socket configuration for framer-owned connections.
//!
//! Every connection the framer registers is non-blocking with TCP_NODELAY
//! set; receive and send buffer sizes are applied when configured (0 means
//! the OS default).

use std::io;
use std::net::TcpStream;

/// Configures a stream for use by the framer.
///
/// # Arguments
/// * `stream` - The connected stream
/// * `receiver_buffer_size` - SO_RCVBUF in bytes, 0 for the OS default
/// * `sender_buffer_size` - SO_SNDBUF in bytes, 0 for the OS default
///
/// # Errors
/// Returns the underlying I/O error if any option cannot be applied.
pub fn configure_stream(
    stream: &TcpStream,
    receiver_buffer_size: usize,
    sender_buffer_size: usize,
) -> io::Result<()> {
    stream.set_nodelay(true)?;

    if receiver_buffer_size > 0 {
        set_buffer_size(stream, BufferDirection::Receive, receiver_buffer_size)?;
    }
    if sender_buffer_size > 0 {
        set_buffer_size(stream, BufferDirection::Send, sender_buffer_size)?;
    }

    stream.set_nonblocking(true)
}

enum BufferDirection {
    Receive,
    Send,
}

#[cfg(unix)]
fn set_buffer_size(
    stream: &TcpStream,
    direction: BufferDirection,
    size: usize,
) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let option = match direction {
        BufferDirection::Receive => libc::SO_RCVBUF,
        BufferDirection::Send => libc::SO_SNDBUF,
    };
    let value = size as libc::c_int;

    let result = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_buffer_size(
    _stream: &TcpStream,
    _direction: BufferDirection,
    size: usize,
) -> io::Result<()> {
    tracing::warn!(size, "socket buffer sizing is not supported on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_configure_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        configure_stream(&client, 64 * 1024, 64 * 1024).unwrap();
        configure_stream(&accepted, 0, 0).unwrap();

        assert!(client.nodelay().unwrap());
    }
}
