use serde::{Deserialize, Serialize};

use crate::{block_id::BlockId, datum::Datum, error::Result, transaction::TxNum};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    Start {
        tx_num: TxNum,
    },
    Commit {
        tx_num: TxNum,
    },
    Rollback {
        tx_num: TxNum,
    },
    /// A field write. `old_image` holds the bytes the write overwrites, which undo copies back
    /// verbatim; the new value is kept so the log describes the full change.
    SetVal {
        tx_num: TxNum,
        block: BlockId,
        offset: u32,
        old_image: Vec<u8>,
        new_val: Datum,
    },
}

impl LogRecord {
    pub fn tx_num(&self) -> TxNum {
        match self {
            LogRecord::Start { tx_num }
            | LogRecord::Commit { tx_num }
            | LogRecord::Rollback { tx_num }
            | LogRecord::SetVal { tx_num, .. } => *tx_num,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde() {
        let log_record = LogRecord::SetVal {
            tx_num: 42,
            block: BlockId::new("test", 1),
            offset: 10,
            old_image: vec![6, 0, 0, 0, b'b', b'e', b'f', b'o', b'r', b'e'],
            new_val: Datum::Varchar("after".into()),
        };

        let decoded = LogRecord::decode(&log_record.encode().unwrap()).unwrap();

        assert_eq!(decoded, log_record);
        assert_eq!(decoded.tx_num(), 42);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(LogRecord::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
