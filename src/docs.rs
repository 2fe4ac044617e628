use crate::modules::transcode::events::{BucketRef, ObjectRef, RawRecord, StorageEntity, TranscodeEvent};
use crate::modules::transcode::model::{InvocationOutcome, OutcomeKind, TranscodeMode};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(crate::modules::transcode::handler::invoke),
    components(
        schemas(
            TranscodeEvent, RawRecord, StorageEntity, BucketRef, ObjectRef,
            InvocationOutcome, OutcomeKind, TranscodeMode,
        )
    ),
    tags(
        (name = "Transcode", description = "Object storage triggered video transcoding")
    )
)]
pub struct ApiDoc;
