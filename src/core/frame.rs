use bytes::Bytes;

/// Transport-neutral websocket frame type.
///
/// Transports convert their native frame representation into/from `WsFrame`; the packet codec
/// only ever produces `Text` frames but accepts `Binary` ones that carry UTF-8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    /// Text frame from an owned string (valid UTF-8 by construction).
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn text_static(s: &'static str) -> Self {
        Self::Text(Bytes::from_static(s.as_bytes()))
    }

    #[inline]
    pub fn close(code: u16, reason: Bytes) -> Self {
        Self::Close(Some(WsCloseFrame { code, reason }))
    }

    /// Normal closure (1000) with a static reason.
    #[inline]
    pub fn normal_close(reason: &'static str) -> Self {
        Self::close(1000, Bytes::from_static(reason.as_bytes()))
    }

    /// UTF-8 view of a data frame, if it has one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsFrame::Text(bytes) | WsFrame::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

/// Borrow the underlying bytes from frames without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) => Some(bytes.as_ref()),
        WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(bytes) => Some(bytes.as_ref()),
        WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_expose_text_only_when_utf8() {
        assert_eq!(WsFrame::text("42").as_text(), Some("42"));
        assert_eq!(
            WsFrame::Binary(Bytes::from_static(b"3")).as_text(),
            Some("3")
        );
        assert_eq!(WsFrame::Binary(Bytes::from_static(&[0xff, 0xfe])).as_text(), None);
        assert_eq!(WsFrame::Ping(Bytes::new()).as_text(), None);
    }
}
