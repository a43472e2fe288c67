use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const GRADIENT_H: Header = 2;
const REDUCED_H: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A process' local contribution to an all-reduce.
    Gradient(&'a [f32]),
    /// The averaged result broadcast by the coordinator.
    Reduced(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join {
        group_name: String,
        rank: usize,
        world_size: usize,
    },
    Welcome {
        world_size: usize,
    },
    Disconnect,
}

/// The application layer message exchanged between the processes of a group.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for this message's kind, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Gradient(_)) => "data/gradient",
            Msg::Data(Payload::Reduced(_)) => "data/reduced",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Gradient(grad) => (GRADIENT_H, *grad),
                    Payload::Reduced(values) => (REDUCED_H, *values),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());
        let rest: &'a [u8] = rest;

        match kind {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            GRADIENT_H | REDUCED_H => {
                let nums: &[f32] = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}"))
                })?;

                let payload = match kind {
                    GRADIENT_H => Payload::Gradient(nums),
                    _ => Payload::Reduced(nums),
                };

                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_frame(msg: &Msg<'_>) -> Vec<u32> {
        let mut head = Vec::new();
        let tail = msg.serialize(&mut head).unwrap_or_default();
        head.extend_from_slice(tail);

        let mut words = vec![0u32; head.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..head.len()].copy_from_slice(&head);
        words
    }

    #[test]
    fn control_message_keeps_its_fields() {
        let msg = Msg::Control(Command::Join {
            group_name: "music".into(),
            rank: 2,
            world_size: 4,
        });

        let mut head = Vec::new();
        assert!(msg.serialize(&mut head).is_none());

        let decoded = Msg::deserialize(&mut head).unwrap();
        let Msg::Control(cmd) = decoded else {
            panic!("expected a control message, got {}", decoded.kind());
        };

        assert_eq!(
            cmd,
            Command::Join {
                group_name: "music".into(),
                rank: 2,
                world_size: 4
            }
        );
    }

    #[test]
    fn gradient_payload_is_viewed_in_place() {
        let grad = [0.5_f32, -1.25, 3.0];
        let mut words = roundtrip_frame(&Msg::Data(Payload::Gradient(&grad)));
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut words);

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(Payload::Gradient(nums)) => assert_eq!(nums, grad),
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = 9u32.to_be_bytes().to_vec();
        assert!(Msg::deserialize(&mut buf).is_err());
    }

    #[test]
    fn short_frame_is_rejected() {
        let mut buf = vec![0u8; 2];
        assert!(Msg::deserialize(&mut buf).is_err());
    }
}
