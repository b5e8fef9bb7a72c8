//! Node record stream codec
//!
//! A file is a sequence of records, each `[u32 BE length][payload]`. The payload
//! is one tag byte (`0` internal, `1` terminal) followed by two length-prefixed
//! blobs: the child hashes of an internal node or the key and value of a
//! terminal.

use super::{ReplicationError, Result};
use crate::CoreError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use datalayer_store::{Node, NodeType};

/// Largest record payload, enforced when nodes are stored, encoded and decoded
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

const TAG_INTERNAL: u8 = 0;
const TAG_TERMINAL: u8 = 1;

/// A node in transport form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedNode {
    pub is_terminal: bool,
    pub value1: Bytes,
    pub value2: Bytes,
}

impl SerializedNode {
    /// The kind of node this record rebuilds
    pub fn node_type(&self) -> NodeType {
        if self.is_terminal {
            NodeType::Terminal
        } else {
            NodeType::Internal
        }
    }

    fn payload_len(&self) -> usize {
        1 + 4 + self.value1.len() + 4 + self.value2.len()
    }

    fn encode_payload(&self, buf: &mut BytesMut) -> crate::Result<()> {
        buf.put_u8(if self.is_terminal { TAG_TERMINAL } else { TAG_INTERNAL });
        for blob in [&self.value1, &self.value2] {
            buf.put_u32(checked_len(blob.len())?);
            buf.put_slice(blob);
        }
        Ok(())
    }

    fn decode_payload(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 1 {
            return Err(ReplicationError::Codec("empty record".to_string()));
        }
        let is_terminal = match payload.get_u8() {
            TAG_INTERNAL => false,
            TAG_TERMINAL => true,
            tag => return Err(ReplicationError::Codec(format!("unknown node tag {tag}"))),
        };
        let value1 = take_blob(&mut payload)?;
        let value2 = take_blob(&mut payload)?;
        if payload.has_remaining() {
            return Err(ReplicationError::Codec(format!(
                "{} trailing bytes in record",
                payload.remaining()
            )));
        }
        Ok(Self {
            is_terminal,
            value1,
            value2,
        })
    }
}

impl From<&Node> for SerializedNode {
    fn from(node: &Node) -> Self {
        match node {
            Node::Internal(internal) => Self {
                is_terminal: false,
                value1: Bytes::copy_from_slice(internal.left_hash.as_bytes()),
                value2: Bytes::copy_from_slice(internal.right_hash.as_bytes()),
            },
            Node::Terminal(terminal) => Self {
                is_terminal: true,
                value1: terminal.key.clone(),
                value2: terminal.value.clone(),
            },
        }
    }
}

/// Size of the record payload a node encodes to
pub fn record_len(node: &Node) -> usize {
    match node {
        Node::Internal(_) => 1 + 4 + 32 + 4 + 32,
        Node::Terminal(terminal) => 1 + 4 + terminal.key.len() + 4 + terminal.value.len(),
    }
}

/// Fail with `NodeTooLarge` if a node cannot be carried by one record
pub fn check_record_len(node: &Node) -> crate::Result<()> {
    checked_len(record_len(node)).map(|_| ())
}

fn checked_len(len: usize) -> crate::Result<u32> {
    let too_large = CoreError::NodeTooLarge {
        size: len,
        limit: MAX_RECORD_SIZE,
    };
    if len > MAX_RECORD_SIZE {
        return Err(too_large);
    }
    u32::try_from(len).map_err(|_| too_large)
}

fn take_blob(buf: &mut Bytes) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(ReplicationError::Codec("truncated blob length".to_string()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ReplicationError::Codec(format!(
            "blob of {len} bytes exceeds remaining {}",
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

/// Encode nodes as a record stream, in the given order
pub fn encode_records<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> crate::Result<Bytes> {
    let mut buf = BytesMut::new();
    for node in nodes {
        let record = SerializedNode::from(node);
        let len = checked_len(record.payload_len())?;
        buf.reserve(4 + record.payload_len());
        buf.put_u32(len);
        record.encode_payload(&mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decode a whole record stream
pub fn decode_records(mut data: Bytes) -> Result<Vec<SerializedNode>> {
    let mut records = Vec::new();
    while data.has_remaining() {
        if data.remaining() < 4 {
            return Err(ReplicationError::Codec("truncated record length".to_string()));
        }
        let len = data.get_u32() as usize;
        if len > MAX_RECORD_SIZE {
            return Err(ReplicationError::Codec(format!(
                "record of {len} bytes exceeds limit of {MAX_RECORD_SIZE}"
            )));
        }
        if data.remaining() < len {
            return Err(ReplicationError::Codec(format!(
                "record of {len} bytes exceeds remaining {}",
                data.remaining()
            )));
        }
        records.push(SerializedNode::decode_payload(data.split_to(len))?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalayer_store::{InternalNode, TerminalNode};

    #[test]
    fn test_terminal_record_layout() {
        let node: Node = TerminalNode::new(&b"ab"[..], &b"c"[..]).into();
        let encoded = encode_records([&node]).unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[
                0, 0, 0, 12, // record length
                1, // terminal
                0, 0, 0, 2, b'a', b'b', //
                0, 0, 0, 1, b'c',
            ]
        );
    }

    #[test]
    fn test_stream_decodes_in_order() {
        let a: Node = TerminalNode::new(&b"a"[..], &b"1"[..]).into();
        let b: Node = TerminalNode::new(&b"b"[..], &b""[..]).into();
        let top: Node = InternalNode::new(a.hash(), b.hash()).into();

        let records = decode_records(encode_records([&a, &b, &top]).unwrap()).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[1].is_terminal);
        assert!(records[1].value2.is_empty());
        assert_eq!(records[2].node_type(), NodeType::Internal);
        assert_eq!(records[2].value1.as_ref(), a.hash().as_bytes());
    }

    #[test]
    fn test_empty_stream() {
        assert!(decode_records(Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_streams_rejected() {
        let node: Node = TerminalNode::new(&b"key"[..], &b"value"[..]).into();
        let encoded = encode_records([&node]).unwrap();

        let truncated = encoded.slice(..encoded.len() - 1);
        assert!(matches!(decode_records(truncated), Err(ReplicationError::Codec(_))));

        let mut bad_tag = encoded.to_vec();
        bad_tag[4] = 7;
        assert!(matches!(decode_records(bad_tag.into()), Err(ReplicationError::Codec(_))));

        let oversized = Bytes::from(((MAX_RECORD_SIZE + 1) as u32).to_be_bytes().to_vec());
        assert!(matches!(decode_records(oversized), Err(ReplicationError::Codec(_))));
    }

    #[test]
    fn test_oversized_node_not_encoded() {
        let value = Bytes::from(vec![0u8; MAX_RECORD_SIZE]);
        let node: Node = TerminalNode::new(&b"k"[..], value).into();
        assert!(record_len(&node) > MAX_RECORD_SIZE);

        let err = encode_records([&node]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::NodeTooLarge { limit: MAX_RECORD_SIZE, .. }
        ));
        assert!(check_record_len(&node).is_err());
    }

    #[test]
    fn test_record_len_matches_encoding() {
        let terminal: Node = TerminalNode::new(&b"key"[..], &b"value"[..]).into();
        let internal: Node = InternalNode::new(terminal.hash(), terminal.hash()).into();
        for node in [&terminal, &internal] {
            let encoded = encode_records([node]).unwrap();
            assert_eq!(encoded.len(), 4 + record_len(node));
        }
    }
}
