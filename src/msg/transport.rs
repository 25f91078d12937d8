/*!
Length-prefixed frame transport over a TCP stream.

Wire layout of one message:

```text
+----------------+----------------+-----------+ ...
| frame count u32| frame len u32  | bytes ... |
+----------------+----------------+-----------+ ...
```

Frames within a message are delivered in order; a short read anywhere
surfaces as a transport error.
*/
use crate::error::WatcherError;
use crate::msg::{Frame, Message};
use std::io::{Read, Write};

/// Upper bound on a single frame; a peer announcing more is misbehaving.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on frames per message; enough for multi-million-cell views.
const MAX_FRAME_CNT: usize = 64 * 1024 * 1024;

pub fn send_message<W: Write>(writer: &mut W, msg: &Message) -> Result<(), WatcherError> {
    writer.write_all(&(msg.len() as u32).to_be_bytes())?;
    for frame in msg {
        writer.write_all(&(frame.len() as u32).to_be_bytes())?;
        writer.write_all(frame)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn recv_message<R: Read>(reader: &mut R) -> Result<Message, WatcherError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let count = u32::from_be_bytes(len_buf) as usize;
    if count == 0 || count > MAX_FRAME_CNT {
        return Err(WatcherError::Protocol(format!("invalid frame count {count}")));
    }

    let mut msg = Message::with_capacity(count.min(64));
    for _ in 0..count {
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(WatcherError::Protocol(format!("oversized frame ({len} bytes)")));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        msg.push(Frame::from(buf));
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{frame_str, frame_u32, frame_u8};
    use bytes::Bytes;
    use std::io::Cursor;

    #[test]
    fn test_round_trip() {
        let mut msg = Message::new();
        msg.push(frame_u8(4));
        msg.push(frame_u32(1234));
        msg.push(frame_str("rrc00"));
        msg.push(Bytes::new());

        let mut wire = Vec::new();
        send_message(&mut wire, &msg).unwrap();
        let decoded = recv_message(&mut Cursor::new(wire)).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0], msg[0]);
        assert_eq!(decoded[1], msg[1]);
        assert_eq!(decoded[2], msg[2]);
        assert!(decoded[3].is_empty());
    }

    #[test]
    fn test_truncated_message() {
        let mut msg = Message::new();
        msg.push(frame_str("payload"));
        let mut wire = Vec::new();
        send_message(&mut wire, &msg).unwrap();
        wire.truncate(wire.len() - 2);
        assert!(matches!(
            recv_message(&mut Cursor::new(wire)),
            Err(WatcherError::Transport(_))
        ));
    }

    #[test]
    fn test_zero_frames_rejected() {
        let wire = 0u32.to_be_bytes().to_vec();
        assert!(matches!(
            recv_message(&mut Cursor::new(wire)),
            Err(WatcherError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&1u32.to_be_bytes());
        wire.extend_from_slice(&(u32::MAX).to_be_bytes());
        assert!(matches!(
            recv_message(&mut Cursor::new(wire)),
            Err(WatcherError::Protocol(_))
        ));
    }
}
