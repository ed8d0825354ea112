use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of the `uploaded` column, always UTC.
pub const UPLOADED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: String,
    pub delete_id: String,
    pub filename: String,
    pub filesize: i64,
    pub upload_ip: String,
    /// Raw timestamp text as stored. See [`FileRecord::uploaded_at`].
    pub uploaded: String,
    pub downloads: i64,
    pub deleted: bool,
}

impl FileRecord {
    /// Object key the bytes live under.
    pub fn object_key(&self) -> String {
        crate::gateway::object_key(&self.id, &self.filename)
    }

    pub fn uploaded_at(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(&self.uploaded, UPLOADED_AT_FORMAT).map(|t| t.and_utc())
    }
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: String,
    pub delete_id: String,
    pub filename: String,
    pub filesize: i64,
    pub upload_ip: String,
    pub uploaded_at: DateTime<Utc>,
}

impl NewFile {
    pub fn into_record(self) -> FileRecord {
        FileRecord {
            id: self.id,
            delete_id: self.delete_id,
            filename: self.filename,
            filesize: self.filesize,
            upload_ip: self.upload_ip,
            uploaded: format_uploaded_at(self.uploaded_at),
            downloads: 0,
            deleted: false,
        }
    }
}

pub fn format_uploaded_at(at: DateTime<Utc>) -> String {
    at.format(UPLOADED_AT_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DownloadEvent {
    pub file_id: String,
    pub ip_address: String,
    pub datetime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    pub delete_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    pub expires: i64,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn uploaded_at_round_trips_through_column_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap();
        let record = NewFile {
            id: "abc123".into(),
            delete_id: "secret".into(),
            filename: "a.txt".into(),
            filesize: 10,
            upload_ip: "127.0.0.1".into(),
            uploaded_at: at,
        }
        .into_record();

        assert_eq!(record.uploaded, "2024-03-09 17:04:05");
        assert_eq!(record.uploaded_at().unwrap(), at);
        assert_eq!(record.object_key(), "abc123/a.txt");
        assert_eq!(record.downloads, 0);
        assert!(!record.deleted);
    }

    #[test]
    fn malformed_uploaded_at_is_an_error() {
        let record = FileRecord {
            id: "abc123".into(),
            delete_id: "secret".into(),
            filename: "a.txt".into(),
            filesize: 10,
            upload_ip: "127.0.0.1".into(),
            uploaded: "yesterday".into(),
            downloads: 0,
            deleted: false,
        };
        assert!(record.uploaded_at().is_err());
    }
}
