//! The job submission wire format: an ordered sequence of typed frames on a
//! one-directional push channel. Each frame is length-prefixed with a 4-byte
//! little-endian count; integer payloads are 4-byte little-endian, string
//! payloads are raw utf-8 bytes. The report channel speaks the same framing
//! in the other direction.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AxeError, Result};

/// event kind announcing a new job to the master
pub const NEW_JOB_EVENT: i32 = 1;

/// upper bound on a sane frame payload
const MAX_FRAME_LEN: u32 = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Int(i32),
    Str(String),
}

impl Frame {
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Frame::Int(value) => value.to_le_bytes().to_vec(),
            Frame::Str(text) => text.as_bytes().to_vec(),
        }
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let payload = self.payload();
        writer
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await?;
        writer.write_all(&payload).await?;
        Ok(())
    }
}

/// read one length-prefixed frame payload
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(AxeError::Protocol(format!(
            "frame length {} exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// decode a decimal-string-encoded millisecond epoch timestamp
pub fn parse_timestamp(payload: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| AxeError::Protocol("timestamp frame is not utf-8".to_string()))?;
    text.trim()
        .parse()
        .map_err(|_| AxeError::Protocol(format!("timestamp frame is not a number: {:?}", text)))
}

/// The ordered frames of one job submission: event kind, the three staged
/// filenames (empty when no job config), the report flag, and, when a report
/// is requested, the submitter's hostname and port. Built once, never
/// reused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSubmissionMessage {
    frames: Vec<Frame>,
}

impl JobSubmissionMessage {
    pub fn new(
        job_manager: &str,
        job_process: &str,
        job_config: Option<&str>,
        report_to: Option<(&str, u16)>,
    ) -> Self {
        let mut frames = vec![
            Frame::Int(NEW_JOB_EVENT),
            Frame::Str(job_manager.to_string()),
            Frame::Str(job_process.to_string()),
            Frame::Str(job_config.unwrap_or("").to_string()),
        ];
        match report_to {
            Some((host, port)) => {
                frames.push(Frame::Int(1));
                frames.push(Frame::Str(host.to_string()));
                // the master reads the port back as text
                frames.push(Frame::Str(port.to_string()));
            }
            None => frames.push(Frame::Int(0)),
        }
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// send every frame in order, then flush
    pub async fn send<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        for frame in &self.frames {
            frame.write_to(writer).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use lazy_static::lazy_static;
    use tokio::runtime::Runtime;

    use super::{parse_timestamp, read_frame, Frame, JobSubmissionMessage, NEW_JOB_EVENT};

    lazy_static! {
        static ref RUNTIME: Runtime = Runtime::new().unwrap();
    }

    #[test]
    fn test_message_without_report_has_five_frames() {
        let message = JobSubmissionMessage::new("jm-100", "jp-100", Some("conf-100"), None);
        let expected = vec![
            Frame::Int(NEW_JOB_EVENT),
            Frame::Str("jm-100".to_string()),
            Frame::Str("jp-100".to_string()),
            Frame::Str("conf-100".to_string()),
            Frame::Int(0),
        ];
        assert_eq!(expected.as_slice(), message.frames());
    }

    #[test]
    fn test_message_with_report_has_seven_frames() {
        let message =
            JobSubmissionMessage::new("jm-100", "jp-100", None, Some(("client0", 41234)));
        let frames = message.frames();
        assert_eq!(7, frames.len());
        // the missing job config is an empty string frame, not an omitted one
        assert_eq!(Frame::Str(String::new()), frames[3]);
        assert_eq!(Frame::Int(1), frames[4]);
        assert_eq!(Frame::Str("client0".to_string()), frames[5]);
        assert_eq!(Frame::Str("41234".to_string()), frames[6]);
    }

    #[test]
    fn test_int_frame_encodes_little_endian() {
        assert_eq!(vec![1u8, 0, 0, 0], Frame::Int(1).payload());
        assert_eq!(vec![0x39u8, 0x30, 0, 0], Frame::Int(12345).payload());
    }

    #[test]
    fn test_frames_round_trip_over_a_stream() {
        RUNTIME.block_on(async {
            let (mut client, mut server) = tokio::io::duplex(1024);
            let message = JobSubmissionMessage::new("a", "b", None, Some(("h", 9)));
            message.send(&mut client).await.unwrap();
            let first = read_frame(&mut server).await.unwrap();
            assert_eq!(Frame::Int(1).payload(), first);
            for expected in &message.frames()[1..] {
                let payload = read_frame(&mut server).await.unwrap();
                assert_eq!(expected.payload(), payload);
            }
        });
    }

    #[test]
    fn test_read_frame_rejects_oversized_length() {
        RUNTIME.block_on(async {
            let (mut client, mut server) = tokio::io::duplex(64);
            use tokio::io::AsyncWriteExt;
            client.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
            assert!(read_frame(&mut server).await.is_err());
        });
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(1620000000123, parse_timestamp(b"1620000000123").unwrap());
        assert!(parse_timestamp(b"not-a-number").is_err());
    }
}
