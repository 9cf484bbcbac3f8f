//! Device wire protocol.
//!
//! Every frame is one command byte followed by a fixed number of fields, each
//! a one byte length and that many bytes:
//!
//! | byte | device → broker | broker → device |
//! |------|-----------------|-----------------|
//! | `+`  | subscribe(topic) | |
//! | `-`  | unsubscribe(topic) | |
//! | `@`  | publish(topic, payload) | publish(topic, payload) |
//! | `!`  | pong | |
//! | `k`  | | ok |
//! | `E`  | | nok |
//! | `?`  | | ping |
//!
//! [`BrokerCodec`] is the broker's side (decodes requests, encodes
//! responses); [`DeviceCodec`] is the mirror image used by the bundled client
//! and the tests.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::broker::message::{Request, Response};
use crate::utils::error::CodecError;

pub const SUBSCRIBE: u8 = b'+';
pub const UNSUBSCRIBE: u8 = b'-';
pub const PUBLISH: u8 = b'@';
pub const PONG: u8 = b'!';

pub const OK: u8 = b'k';
pub const NOK: u8 = b'E';
pub const PING: u8 = b'?';

/// Longest field a one byte length prefix can describe.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

#[derive(Debug, Default, Clone, Copy)]
pub struct BrokerCodec;

#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceCodec;

impl Decoder for BrokerCodec {
    type Item = Request;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, CodecError> {
        let Some(&command) = src.first() else {
            return Ok(None);
        };

        let request = match command {
            PONG => {
                src.advance(1);
                Request::Pong
            }
            SUBSCRIBE | UNSUBSCRIBE => {
                let Some(mut frame) = take_frame(src, 1) else {
                    return Ok(None);
                };
                let topic = ascii_field(&mut frame)?;
                if command == SUBSCRIBE {
                    Request::Subscribe { topic }
                } else {
                    Request::Unsubscribe { topic }
                }
            }
            PUBLISH => {
                let Some(mut frame) = take_frame(src, 2) else {
                    return Ok(None);
                };
                let topic = ascii_field(&mut frame)?;
                let payload = take_field(&mut frame);
                Request::Publish { topic, payload }
            }
            other => return Err(CodecError::UnknownCommand(other)),
        };
        Ok(Some(request))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Request>, CodecError> {
        finish(self.decode(src)?, src)
    }
}

impl Encoder<Response> for BrokerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), CodecError> {
        match item {
            Response::Ok => dst.put_u8(OK),
            Response::Nok(_) => dst.put_u8(NOK),
            Response::Ping => dst.put_u8(PING),
            Response::Publish { topic, payload } => {
                put_publish(dst, topic.as_bytes(), &payload)?;
            }
        }
        Ok(())
    }
}

impl Decoder for DeviceCodec {
    type Item = Response;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, CodecError> {
        let Some(&reply) = src.first() else {
            return Ok(None);
        };

        let response = match reply {
            OK => {
                src.advance(1);
                Response::Ok
            }
            NOK => {
                src.advance(1);
                Response::Nok(String::new())
            }
            PING => {
                src.advance(1);
                Response::Ping
            }
            PUBLISH => {
                let Some(mut frame) = take_frame(src, 2) else {
                    return Ok(None);
                };
                let topic = ascii_field(&mut frame)?;
                let payload = take_field(&mut frame);
                Response::Publish { topic, payload }
            }
            other => return Err(CodecError::UnknownCommand(other)),
        };
        Ok(Some(response))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Response>, CodecError> {
        finish(self.decode(src)?, src)
    }
}

impl Encoder<Request> for DeviceCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), CodecError> {
        match item {
            Request::Subscribe { topic } => put_topic_command(dst, SUBSCRIBE, &topic)?,
            Request::Unsubscribe { topic } => put_topic_command(dst, UNSUBSCRIBE, &topic)?,
            Request::Publish { topic, payload } => put_publish(dst, topic.as_bytes(), &payload)?,
            Request::Pong => dst.put_u8(PONG),
            Request::UnsubscribeAll { .. } => return Err(CodecError::NotOnWire("unsubscribe_all")),
        }
        Ok(())
    }
}

/// End of stream: anything still buffered is a frame cut short.
fn finish<T>(decoded: Option<T>, src: &BytesMut) -> Result<Option<T>, CodecError> {
    match decoded {
        Some(item) => Ok(Some(item)),
        None if src.is_empty() => Ok(None),
        None => Err(CodecError::Truncated {
            buffered: src.len(),
        }),
    }
}

/// Splits off the command byte plus `fields` length-prefixed fields, or
/// returns `None` (consuming nothing) if they are not all buffered yet.
fn take_frame(src: &mut BytesMut, fields: usize) -> Option<Bytes> {
    let mut end = 1;
    for _ in 0..fields {
        let len = *src.get(end)? as usize;
        end += 1 + len;
        if src.len() < end {
            return None;
        }
    }
    let mut frame = src.split_to(end).freeze();
    frame.advance(1);
    Some(frame)
}

fn take_field(frame: &mut Bytes) -> Bytes {
    let len = frame.get_u8() as usize;
    frame.split_to(len)
}

fn ascii_field(frame: &mut Bytes) -> Result<String, CodecError> {
    let field = take_field(frame);
    if !field.is_ascii() {
        return Err(CodecError::NonAsciiTopic);
    }
    String::from_utf8(field.to_vec()).map_err(|_| CodecError::NonAsciiTopic)
}

fn put_field(dst: &mut BytesMut, field: &[u8]) -> Result<(), CodecError> {
    let len = u8::try_from(field.len()).map_err(|_| CodecError::FieldTooLong { len: field.len() })?;
    dst.put_u8(len);
    dst.put_slice(field);
    Ok(())
}

fn check_len(field: &[u8]) -> Result<(), CodecError> {
    if field.len() > MAX_FIELD_LEN {
        return Err(CodecError::FieldTooLong { len: field.len() });
    }
    Ok(())
}

fn put_topic_command(dst: &mut BytesMut, command: u8, topic: &str) -> Result<(), CodecError> {
    check_len(topic.as_bytes())?;
    dst.reserve(2 + topic.len());
    dst.put_u8(command);
    put_field(dst, topic.as_bytes())
}

fn put_publish(dst: &mut BytesMut, topic: &[u8], payload: &[u8]) -> Result<(), CodecError> {
    // validate both fields before writing anything
    check_len(topic)?;
    check_len(payload)?;
    dst.reserve(3 + topic.len() + payload.len());
    dst.put_u8(PUBLISH);
    put_field(dst, topic)?;
    put_field(dst, payload)
}
