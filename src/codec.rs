//! Binary format of snapshots and save files.
//!
//! Every record is written as its class id, name, transform (translation, rotation quaternion,
//! scale), physics flag and a `u32` length prefixed payload. Integers and floats are fixed width
//! little endian and strings carry a `u64` length prefix. A save file is the world name, the
//! record count as a `u32` and the records.

use bevy::{
    log::warn,
    prelude::{Quat, Transform, Vec3},
};
use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::StateSaveError,
    record::{ClassId, ObjectRecord, SnapshotStore},
};

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Everything in a record before its payload
#[derive(Serialize, Deserialize)]
struct RecordHeader {
    class_id: ClassId,
    name: String,
    translation: [f32; 3],
    rotation: [f32; 4],
    scale: [f32; 3],
    physics_active: bool,
}

/// The contents of a save file
#[derive(Debug, PartialEq)]
pub struct SaveFile {
    pub world_name: String,
    pub item_count: u32,
    pub records: Vec<u8>,
}

/// Serializes every record of the store in enumeration order. Returns the bytes and how many
/// records they hold.
pub fn encode_snapshot(store: &SnapshotStore) -> Result<(Vec<u8>, u32), StateSaveError> {
    let mut bytes: Vec<u8> = vec![];
    let mut item_count: u32 = 0;
    for record in store.records() {
        write_record(&mut bytes, record)?;
        item_count += 1;
    }
    Ok((bytes, item_count))
}

/// Reads exactly `item_count` records into `store`.
///
/// A store that already holds records is cleared first with a warning. If the bytes run out or
/// are malformed the store is left empty.
pub fn decode_snapshot(
    bytes: &[u8],
    item_count: u32,
    store: &mut SnapshotStore,
) -> Result<(), StateSaveError> {
    if !store.is_empty() {
        warn!(
            "decoding into a snapshot that already holds {} records, clearing it first",
            store.len()
        );
        store.clear();
    }

    let mut cursor = bytes;
    for index in 0..item_count {
        let record = match read_record(&mut cursor) {
            Ok(record) => record,
            Err(err) => {
                store.clear();
                return Err(StateSaveError::CorruptData(format!(
                    "record {} of {}: {}",
                    index + 1,
                    item_count,
                    err
                )));
            }
        };
        if store.contains(&record.name) {
            let name = record.name;
            store.clear();
            return Err(StateSaveError::CorruptData(format!(
                "record name {} appears twice",
                name
            )));
        }
        store.insert(record);
    }

    if !cursor.is_empty() {
        warn!("{} bytes left over after the last record", cursor.len());
    }
    Ok(())
}

/// Wraps encoded records with the identity of the world they were captured in
pub fn encode_save_file(world_name: &str, store: &SnapshotStore) -> Result<Vec<u8>, StateSaveError> {
    let (records, item_count) = encode_snapshot(store)?;
    let mut bytes: Vec<u8> = vec![];
    wire_options().serialize_into(&mut bytes, world_name)?;
    wire_options().serialize_into(&mut bytes, &item_count)?;
    bytes.extend_from_slice(&records);
    Ok(bytes)
}

pub fn decode_save_file(bytes: &[u8]) -> Result<SaveFile, StateSaveError> {
    let mut cursor = bytes;
    let world_name: String = read_value(&mut cursor)?;
    let item_count: u32 = read_value(&mut cursor)?;
    Ok(SaveFile {
        world_name,
        item_count,
        records: cursor.to_vec(),
    })
}

fn write_record(bytes: &mut Vec<u8>, record: &ObjectRecord) -> Result<(), StateSaveError> {
    let header = RecordHeader {
        class_id: record.class_id,
        name: record.name.clone(),
        translation: record.transform.translation.to_array(),
        rotation: record.transform.rotation.to_array(),
        scale: record.transform.scale.to_array(),
        physics_active: record.physics_active,
    };
    let payload_len = u32::try_from(record.payload.len()).map_err(|_| {
        StateSaveError::CorruptData(format!("payload of {} is too large", record.name))
    })?;

    wire_options().serialize_into(&mut *bytes, &header)?;
    wire_options().serialize_into(&mut *bytes, &payload_len)?;
    bytes.extend_from_slice(&record.payload);
    Ok(())
}

/// Reads one value, never more than the bytes that remain
fn read_value<T: DeserializeOwned>(cursor: &mut &[u8]) -> Result<T, StateSaveError> {
    let limit = cursor.len() as u64;
    Ok(wire_options()
        .with_limit(limit)
        .deserialize_from(&mut *cursor)?)
}

fn read_record(cursor: &mut &[u8]) -> Result<ObjectRecord, StateSaveError> {
    let header: RecordHeader = read_value(cursor)?;
    let payload_len: u32 = read_value(cursor)?;

    let payload_len = payload_len as usize;
    if cursor.len() < payload_len {
        return Err(StateSaveError::CorruptData(format!(
            "payload of {} declares {} bytes but only {} remain",
            header.name,
            payload_len,
            cursor.len()
        )));
    }
    let (payload, rest) = cursor.split_at(payload_len);
    *cursor = rest;

    Ok(ObjectRecord {
        name: header.name,
        class_id: header.class_id,
        transform: Transform {
            translation: Vec3::from_array(header.translation),
            rotation: Quat::from_array(header.rotation),
            scale: Vec3::from_array(header.scale),
        },
        physics_active: header.physics_active,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod test {
    use bevy::prelude::{Quat, Transform, Vec3};

    use super::{decode_save_file, decode_snapshot, encode_save_file, encode_snapshot};
    use crate::{
        error::ErrorKind,
        record::{ObjectRecord, SnapshotStore},
    };

    fn sample_store() -> SnapshotStore {
        let mut store = SnapshotStore::new(&[0, 2]);
        store.insert(ObjectRecord {
            name: "crate_a".to_string(),
            class_id: 0,
            transform: Transform {
                translation: Vec3::new(1.0, 2.0, 3.0),
                rotation: Quat::from_rotation_y(0.5),
                scale: Vec3::splat(2.0),
            },
            physics_active: true,
            payload: vec![9, 8, 7],
        });
        store.insert(ObjectRecord {
            name: "barrel_b".to_string(),
            class_id: 2,
            transform: Transform::IDENTITY,
            physics_active: false,
            payload: vec![],
        });
        store
    }

    #[test]
    fn test_snapshot_survives_encoding() {
        let store = sample_store();
        let (bytes, item_count) = encode_snapshot(&store).unwrap();
        assert_eq!(item_count, 2);

        let mut decoded = SnapshotStore::default();
        decode_snapshot(&bytes, item_count, &mut decoded).unwrap();
        assert_eq!(decoded, store);
    }

    #[test]
    fn test_record_layout() {
        let mut store = SnapshotStore::default();
        store.insert(ObjectRecord {
            name: "ab".to_string(),
            class_id: 0x0102,
            transform: Transform::IDENTITY,
            physics_active: true,
            payload: vec![0xAA],
        });
        let (bytes, _) = encode_snapshot(&store).unwrap();

        // class id, name length + name, 10 floats, bool, payload length, payload
        assert_eq!(bytes.len(), 2 + 8 + 2 + 40 + 1 + 4 + 1);
        assert_eq!(&bytes[0..2], &[0x02, 0x01]);
        assert_eq!(&bytes[2..10], &2u64.to_le_bytes());
        assert_eq!(&bytes[10..12], b"ab");
        assert_eq!(bytes[52], 1);
        assert_eq!(&bytes[53..57], &1u32.to_le_bytes());
        assert_eq!(bytes[57], 0xAA);
    }

    #[test]
    fn test_truncated_payload_leaves_store_empty() {
        let (mut bytes, item_count) = encode_snapshot(&sample_store()).unwrap();
        bytes.truncate(bytes.len() - 1);

        let mut decoded = SnapshotStore::default();
        let err = decode_snapshot(&bytes, item_count, &mut decoded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_more_items_than_bytes_is_corrupt() {
        let (bytes, item_count) = encode_snapshot(&sample_store()).unwrap();
        let mut decoded = SnapshotStore::default();
        let err = decode_snapshot(&bytes, item_count + 1, &mut decoded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decoding_into_filled_store_replaces_it() {
        let (bytes, item_count) = encode_snapshot(&sample_store()).unwrap();
        let mut decoded = SnapshotStore::default();
        decoded.insert(ObjectRecord {
            name: "stale".to_string(),
            class_id: 7,
            transform: Transform::IDENTITY,
            physics_active: false,
            payload: vec![],
        });

        decode_snapshot(&bytes, item_count, &mut decoded).unwrap();
        assert!(!decoded.contains("stale"));
        assert!(!decoded.tracked_classes().contains(&7));
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_save_file_envelope() {
        let bytes = encode_save_file("harbor", &sample_store()).unwrap();
        let file = decode_save_file(&bytes).unwrap();
        assert_eq!(file.world_name, "harbor");
        assert_eq!(file.item_count, 2);

        let mut decoded = SnapshotStore::default();
        decode_snapshot(&file.records, file.item_count, &mut decoded).unwrap();
        assert_eq!(decoded.len(), 2);

        assert!(decode_save_file(&bytes[..3]).is_err());
    }
}
