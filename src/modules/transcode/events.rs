use crate::common::error::{InvocationError, InvocationResult};
use serde::Deserialize;
use utoipa::ToSchema;

/// Notification batch delivered by the object store trigger.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TranscodeEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<RawRecord>,
}

/// One record as delivered; either an S3-style or an OBS-style entity.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RawRecord {
    pub s3: Option<StorageEntity>,
    pub obs: Option<StorageEntity>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StorageEntity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ObjectRef {
    pub key: String,
}

#[derive(Debug, Clone)]
pub enum EventRecord {
    S3(StorageEntity),
    Obs(StorageEntity),
}

/// Bucket and decoded key of the object that triggered the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObject {
    pub bucket: String,
    pub key: String,
}

impl TranscodeEvent {
    /// Batches carry one record in practice; anything after the first is
    /// not looked at.
    pub fn first_record(&self) -> InvocationResult<EventRecord> {
        let raw = self
            .records
            .first()
            .ok_or_else(|| InvocationError::InvalidEvent("event has no Records".to_string()))?;
        EventRecord::try_from(raw)
    }
}

impl TryFrom<&RawRecord> for EventRecord {
    type Error = InvocationError;

    fn try_from(raw: &RawRecord) -> Result<Self, Self::Error> {
        match (&raw.s3, &raw.obs) {
            (Some(entity), _) => Ok(Self::S3(entity.clone())),
            (None, Some(entity)) => Ok(Self::Obs(entity.clone())),
            (None, None) => Err(InvocationError::InvalidEvent(
                "record has neither an s3 nor an obs entity".to_string(),
            )),
        }
    }
}

impl EventRecord {
    fn entity(&self) -> &StorageEntity {
        match self {
            Self::S3(entity) | Self::Obs(entity) => entity,
        }
    }

    /// Keys arrive form-encoded: `+` is a space, `%XX` an escaped byte.
    pub fn source_object(&self) -> InvocationResult<SourceObject> {
        let entity = self.entity();
        let plus_decoded = entity.object.key.replace('+', " ");
        let key = urlencoding::decode(&plus_decoded)
            .map_err(|e| {
                InvocationError::InvalidEvent(format!(
                    "object key '{}' is not valid UTF-8 once decoded: {}",
                    entity.object.key, e
                ))
            })?
            .into_owned();

        Ok(SourceObject {
            bucket: entity.bucket.name.clone(),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> TranscodeEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn s3_record_resolves_bucket_and_key() {
        let event = parse(
            r#"{"Records":[{"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"src"},"object":{"key":"clip.mp4","size":1024}}}]}"#,
        );
        let source = event.first_record().unwrap().source_object().unwrap();
        assert_eq!(
            source,
            SourceObject {
                bucket: "src".into(),
                key: "clip.mp4".into()
            }
        );
    }

    #[test]
    fn obs_record_resolves_bucket_and_key() {
        let event = parse(
            r#"{"Records":[{"eventVersion":"3.0","obs":{"bucket":{"name":"obs-src"},"object":{"key":"in/clip.mov"}}}]}"#,
        );
        let record = event.first_record().unwrap();
        assert!(matches!(record, EventRecord::Obs(_)));
        assert_eq!(record.source_object().unwrap().key, "in/clip.mov");
    }

    #[test]
    fn s3_entity_wins_when_both_present() {
        let event = parse(
            r#"{"Records":[{"s3":{"bucket":{"name":"a"},"object":{"key":"x"}},"obs":{"bucket":{"name":"b"},"object":{"key":"y"}}}]}"#,
        );
        assert_eq!(event.first_record().unwrap().source_object().unwrap().bucket, "a");
    }

    #[test]
    fn key_is_form_decoded() {
        let event = parse(
            r#"{"Records":[{"s3":{"bucket":{"name":"src"},"object":{"key":"my+holiday%2B2024%2Fday%201.mp4"}}}]}"#,
        );
        let source = event.first_record().unwrap().source_object().unwrap();
        assert_eq!(source.key, "my holiday+2024/day 1.mp4");
    }

    #[test]
    fn only_first_record_is_used() {
        let event = parse(
            r#"{"Records":[
                {"s3":{"bucket":{"name":"src"},"object":{"key":"first.mp4"}}},
                {"s3":{"bucket":{"name":"src"},"object":{"key":"second.mp4"}}}
            ]}"#,
        );
        assert_eq!(event.first_record().unwrap().source_object().unwrap().key, "first.mp4");
    }

    #[test]
    fn empty_or_shapeless_records_are_invalid() {
        let empty = parse(r#"{"Records":[]}"#);
        assert!(matches!(empty.first_record(), Err(InvocationError::InvalidEvent(_))));

        let missing = parse("{}");
        assert!(matches!(missing.first_record(), Err(InvocationError::InvalidEvent(_))));

        let shapeless = parse(r#"{"Records":[{"eventName":"ObjectCreated:Put"}]}"#);
        assert!(matches!(shapeless.first_record(), Err(InvocationError::InvalidEvent(_))));
    }
}
