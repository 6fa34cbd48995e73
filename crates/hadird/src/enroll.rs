//! Profile photo enrolment: derive and store the reference fingerprint.

use chrono::NaiveDateTime;
use hadir_core::fingerprint::{fingerprint_image, looks_like_face, Fingerprint, CANONICAL_SIZE};
use hadir_store::{ActivityEntry, ActivityLog, ProfileStore, StoreError};
use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot read photo: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub employee_id: i64,
    pub fingerprint: Fingerprint,
    /// Whether the photo passed the face heuristic. Stored either way.
    pub looks_like_face: bool,
}

pub async fn enroll_photo_file(
    profiles: &dyn ProfileStore,
    activity: &dyn ActivityLog,
    employee_id: i64,
    path: &Path,
    now: NaiveDateTime,
) -> Result<Enrollment, EnrollError> {
    let img = image::open(path)?;
    enroll_photo(profiles, activity, employee_id, &img, now).await
}

pub async fn enroll_photo(
    profiles: &dyn ProfileStore,
    activity: &dyn ActivityLog,
    employee_id: i64,
    img: &DynamicImage,
    now: NaiveDateTime,
) -> Result<Enrollment, EnrollError> {
    let canonical = img
        .resize_exact(CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Triangle)
        .to_rgba8();
    let is_face = looks_like_face(canonical.as_raw(), canonical.width(), canonical.height());
    if !is_face {
        tracing::warn!(employee_id, "profile photo does not look like a face; storing anyway");
    }

    let fingerprint = fingerprint_image(img);
    profiles.set_stored_fingerprint(employee_id, &fingerprint).await?;
    tracing::info!(employee_id, "profile fingerprint stored");

    let entry = ActivityEntry {
        actor: employee_id,
        action: "profile.photo_enrolled".into(),
        payload: serde_json::json!({ "looks_like_face": is_face }),
        created_at: now,
    };
    if let Err(e) = activity.record(entry).await {
        tracing::warn!(error = %e, "activity log write failed");
    }

    Ok(Enrollment {
        employee_id,
        fingerprint,
        looks_like_face: is_face,
    })
}
