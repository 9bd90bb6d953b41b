//! # Serial Console Module
//!
//! Handles the text command console on a serial port or stdin.
//!
//! This module handles:
//! - Opening the console serial port
//! - Assembling bytes into command lines with simple line editing
//! - Forwarding complete lines to the lifecycle and writing replies back

use std::borrow::Cow;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, NodeError, Result};
use crate::lifecycle::MAX_LINE_LEN;

const BACKSPACE: u8 = 8;
const NEWLINE: u8 = 10;
const ESCAPE: u8 = 27;

/// Result of feeding one byte to a [`LineAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// The line exceeded the maximum length and was discarded.
    TooLong,
    /// The line was not valid UTF-8 and was discarded.
    Malformed,
}

/// Byte-wise line editor.
///
/// Printable bytes append, backspace deletes, escape clears, newline
/// completes a non-empty line. Other control bytes are ignored. Bytes of
/// multi-byte characters are kept and the line is checked as UTF-8 when it
/// completes; the length limit counts characters.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
    chars: usize,
    overflow: bool,
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<LineEvent> {
        match byte {
            NEWLINE => {
                let line = std::mem::take(&mut self.buf);
                self.chars = 0;
                if std::mem::take(&mut self.overflow) {
                    return Some(LineEvent::TooLong);
                }
                if line.is_empty() {
                    return None;
                }
                Some(match String::from_utf8(line) {
                    Ok(line) => LineEvent::Line(line),
                    Err(_) => LineEvent::Malformed,
                })
            }
            BACKSPACE => {
                while let Some(last) = self.buf.pop() {
                    if !is_continuation(last) {
                        self.chars = self.chars.saturating_sub(1);
                        break;
                    }
                }
                None
            }
            ESCAPE => {
                self.clear();
                None
            }
            0x20..=0x7E | 0x80..=0xFF => {
                if self.overflow {
                    return None;
                }
                if is_continuation(byte) {
                    self.buf.push(byte);
                } else if self.chars >= MAX_LINE_LEN {
                    self.clear();
                    self.overflow = true;
                } else {
                    self.buf.push(byte);
                    self.chars += 1;
                }
                None
            }
            _ => None,
        }
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.chars = 0;
        self.overflow = false;
    }

    /// Text typed so far on the current line.
    pub fn pending(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buf)
    }
}

/// Open the console serial port, 8N1 without flow control.
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB0")
/// * `baud_rate` - Line speed
///
/// # Errors
///
/// Returns [`NodeError::Serial`] if the port cannot be opened
pub fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| NodeError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Console opened on {} at {} baud", path, baud_rate);
    Ok(port)
}

/// Read console bytes until end of input, forwarding complete lines.
///
/// Over-long lines never reach `lines`; their rejection goes straight to
/// `replies`.
///
/// # Errors
///
/// Returns [`NodeError::Console`] on a read failure
pub async fn read_lines<R: AsyncRead + Unpin>(
    mut reader: R,
    lines: mpsc::Sender<String>,
    replies: mpsc::Sender<String>,
) -> Result<()> {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 64];

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| NodeError::Console(format!("Failed to read console: {}", e)))?;
        if n == 0 {
            debug!("Console input closed");
            return Ok(());
        }

        for &byte in &buf[..n] {
            match assembler.push(byte) {
                Some(LineEvent::Line(line)) => {
                    if lines.send(line).await.is_err() {
                        return Ok(());
                    }
                }
                Some(rejected @ (LineEvent::TooLong | LineEvent::Malformed)) => {
                    let kind = if rejected == LineEvent::TooLong {
                        warn!("Console line longer than {} characters dropped", MAX_LINE_LEN);
                        ErrorKind::LengthError
                    } else {
                        warn!("Console line with invalid UTF-8 dropped");
                        ErrorKind::FormatError
                    };
                    if replies.send(kind.description().to_string()).await.is_err() {
                        return Ok(());
                    }
                }
                None => {}
            }
        }
    }
}

/// Write every reply as one or more newline-terminated lines.
///
/// # Errors
///
/// Returns [`NodeError::Console`] on a write failure
pub async fn write_replies<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut replies: mpsc::Receiver<String>,
) -> Result<()> {
    while let Some(reply) = replies.recv().await {
        let mut text = reply.trim_end().to_string();
        text.push('\n');
        writer
            .write_all(text.as_bytes())
            .await
            .map_err(|e| NodeError::Console(format!("Failed to write reply: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| NodeError::Console(format!("Failed to flush console: {}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut LineAssembler, bytes: &[u8]) -> Vec<LineEvent> {
        bytes.iter().filter_map(|&b| assembler.push(b)).collect()
    }

    #[test]
    fn test_line_completion() {
        let mut assembler = LineAssembler::new();
        assert_eq!(
            feed(&mut assembler, b"+AT\n"),
            vec![LineEvent::Line("+AT".to_string())]
        );
        assert_eq!(assembler.pending(), "");
    }

    #[test]
    fn test_empty_lines_ignored() {
        let mut assembler = LineAssembler::new();
        assert!(feed(&mut assembler, b"\n\n").is_empty());
    }

    #[test]
    fn test_backspace_and_escape() {
        let mut assembler = LineAssembler::new();
        assert!(feed(&mut assembler, b"+drx").is_empty());
        assembler.push(BACKSPACE);
        assert_eq!(assembler.pending(), "+dr");

        feed(&mut assembler, b"=3");
        assembler.push(ESCAPE);
        assert_eq!(assembler.pending(), "");

        assert_eq!(
            feed(&mut assembler, b"+dr=4\n"),
            vec![LineEvent::Line("+dr=4".to_string())]
        );
    }

    #[test]
    fn test_control_bytes_ignored() {
        let mut assembler = LineAssembler::new();
        assert_eq!(
            feed(&mut assembler, b"+SL\rEEP\t\n"),
            vec![LineEvent::Line("+SLEEP".to_string())]
        );
    }

    #[test]
    fn test_utf8_characters_kept() {
        let mut assembler = LineAssembler::new();
        assert_eq!(
            feed(&mut assembler, "+ssid=Café Ñ\n".as_bytes()),
            vec![LineEvent::Line("+ssid=Café Ñ".to_string())]
        );

        // Backspace removes a whole character.
        feed(&mut assembler, "+ssidé".as_bytes());
        assembler.push(BACKSPACE);
        assert_eq!(assembler.pending(), "+ssid");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut assembler = LineAssembler::new();
        assert_eq!(
            feed(&mut assembler, b"+ssid=\xFFab\n"),
            vec![LineEvent::Malformed]
        );
        assert_eq!(
            feed(&mut assembler, b"+AT\n"),
            vec![LineEvent::Line("+AT".to_string())]
        );
    }

    #[test]
    fn test_length_counts_characters() {
        let mut assembler = LineAssembler::new();
        let mut input = "é".repeat(MAX_LINE_LEN).into_bytes();
        input.push(NEWLINE);
        let events = feed(&mut assembler, &input);
        assert!(matches!(&events[..], [LineEvent::Line(l)] if l.chars().count() == MAX_LINE_LEN));
    }

    #[test]
    fn test_long_line_rejected() {
        let mut assembler = LineAssembler::new();
        let mut input = vec![b'a'; MAX_LINE_LEN];
        assert!(feed(&mut assembler, &input).is_empty());
        input.push(b'b');
        input.push(NEWLINE);

        let mut assembler = LineAssembler::new();
        assert_eq!(feed(&mut assembler, &input), vec![LineEvent::TooLong]);
        // The next line is unaffected.
        assert_eq!(
            feed(&mut assembler, b"+AT\n"),
            vec![LineEvent::Line("+AT".to_string())]
        );
    }

    #[test]
    fn test_max_length_line_accepted() {
        let mut assembler = LineAssembler::new();
        let mut input = vec![b'x'; MAX_LINE_LEN];
        input.push(NEWLINE);
        let events = feed(&mut assembler, &input);
        assert!(matches!(&events[..], [LineEvent::Line(l)] if l.len() == MAX_LINE_LEN));
    }

    #[tokio::test]
    async fn test_read_lines_forwards_commands() {
        let mut long = vec![b'z'; MAX_LINE_LEN + 5];
        long.push(NEWLINE);
        let reader = tokio_test::io::Builder::new()
            .read(b"+A")
            .read(b"T\n+dr=3\n")
            .read(&long)
            .build();

        let (line_tx, mut line_rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        read_lines(reader, line_tx, reply_tx).await.unwrap();

        assert_eq!(line_rx.recv().await.unwrap(), "+AT");
        assert_eq!(line_rx.recv().await.unwrap(), "+dr=3");
        assert!(line_rx.recv().await.is_none());
        assert_eq!(
            reply_rx.recv().await.unwrap(),
            ErrorKind::LengthError.description()
        );
    }

    #[tokio::test]
    async fn test_write_replies_terminates_lines() {
        let writer = tokio_test::io::Builder::new()
            .write(b"OK\n")
            .write(b"[Time]\ntimezone=60\n")
            .build();
        let (tx, rx) = mpsc::channel(4);
        tx.send("OK".to_string()).await.unwrap();
        tx.send("[Time]\ntimezone=60\n".to_string()).await.unwrap();
        drop(tx);

        write_replies(writer, rx).await.unwrap();
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let result = open_port("/dev/nonexistent_serial_device_12345", 115200);

        match result {
            Err(NodeError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other.map(|_| ())),
        }
    }
}
