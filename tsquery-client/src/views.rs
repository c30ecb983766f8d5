//! Typed views over response records.

use serde::{Deserialize, Serialize};
use tsquery_protocol::{ProtocolError, Record};

/// One entry of `clientlist`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub id: u32,
    pub channel_id: u32,
    pub database_id: u32,
    pub nickname: String,
    /// 0 = voice client, 1 = query client.
    pub client_type: u32,
}

impl ClientEntry {
    pub fn is_query(&self) -> bool {
        self.client_type == 1
    }
}

impl TryFrom<&Record> for ClientEntry {
    type Error = ProtocolError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.parse_required("clid")?,
            channel_id: record.parse("cid")?.unwrap_or_default(),
            database_id: record.parse("client_database_id")?.unwrap_or_default(),
            nickname: record.require("client_nickname")?.to_string(),
            client_type: record.parse("client_type")?.unwrap_or_default(),
        })
    }
}

/// One entry of `channellist`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub id: u32,
    pub parent_id: u32,
    pub order: u32,
    pub name: String,
    pub total_clients: u32,
}

impl TryFrom<&Record> for ChannelEntry {
    type Error = ProtocolError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.parse_required("cid")?,
            parent_id: record.parse("pid")?.unwrap_or_default(),
            order: record.parse("channel_order")?.unwrap_or_default(),
            name: record.require("channel_name")?.to_string(),
            total_clients: record.parse("total_clients")?.unwrap_or_default(),
        })
    }
}

/// Result of `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub build: u64,
    pub platform: String,
}

impl TryFrom<&Record> for VersionInfo {
    type Error = ProtocolError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Self {
            version: record.require("version")?.to_string(),
            build: record.parse_required("build")?,
            platform: record.get("platform").unwrap_or_default().to_string(),
        })
    }
}

/// Result of `whoami`.
///
/// Before a virtual server is selected most ids are 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoAmI {
    pub server_status: String,
    pub server_id: u32,
    pub server_port: u16,
    pub client_id: u32,
    pub channel_id: u32,
    pub nickname: Option<String>,
    pub database_id: u32,
    pub login_name: Option<String>,
    pub unique_identifier: Option<String>,
}

impl TryFrom<&Record> for WhoAmI {
    type Error = ProtocolError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        let owned = |key: &str| record.get(key).map(str::to_string);
        Ok(Self {
            server_status: record
                .get("virtualserver_status")
                .unwrap_or("unknown")
                .to_string(),
            server_id: record.parse("virtualserver_id")?.unwrap_or_default(),
            server_port: record.parse("virtualserver_port")?.unwrap_or_default(),
            client_id: record.parse("client_id")?.unwrap_or_default(),
            channel_id: record.parse("client_channel_id")?.unwrap_or_default(),
            nickname: owned("client_nickname"),
            database_id: record.parse("client_database_id")?.unwrap_or_default(),
            login_name: owned("client_login_name"),
            unique_identifier: owned("client_unique_identifier"),
        })
    }
}

/// Converts every record, failing on the first that does not fit.
pub fn collect_views<'a, T>(records: &'a [Record]) -> Result<Vec<T>, ProtocolError>
where
    T: TryFrom<&'a Record, Error = ProtocolError>,
{
    records.iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsquery_protocol::parse_records;

    #[test]
    fn test_client_entries() {
        let records = parse_records(
            "clid=1 cid=1 client_database_id=2 client_nickname=Alice client_type=0|clid=2 client_nickname=Bob",
        );
        let clients: Vec<ClientEntry> = collect_views(&records).unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].nickname, "Alice");
        assert_eq!(clients[1].nickname, "Bob");
        assert_eq!(clients[1].id, 2);
        // Inherited from the first record.
        assert_eq!(clients[1].database_id, 2);
        assert!(!clients[0].is_query());
    }

    #[test]
    fn test_missing_required_field() {
        let records = parse_records("cid=1 channel_order=0");
        let err = collect_views::<ChannelEntry>(&records).unwrap_err();
        assert_eq!(err, ProtocolError::MissingField("channel_name"));
    }

    #[test]
    fn test_version_and_whoami() {
        let version = VersionInfo::try_from(
            &parse_records("version=3.13.7 build=1655727713 platform=Linux")[0],
        )
        .unwrap();
        assert_eq!(version.version, "3.13.7");
        assert_eq!(version.build, 1655727713);

        let whoami = WhoAmI::try_from(
            &parse_records(
                "virtualserver_status=online virtualserver_id=1 virtualserver_port=9987 client_id=3 client_channel_id=1 client_nickname=serveradmin\\sfrom\\s127.0.0.1:50000 client_database_id=1 client_login_name=serveradmin",
            )[0],
        )
        .unwrap();
        assert_eq!(whoami.server_port, 9987);
        assert_eq!(
            whoami.nickname.as_deref(),
            Some("serveradmin from 127.0.0.1:50000")
        );
        assert_eq!(whoami.unique_identifier, None);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let records = parse_records("clid=abc client_nickname=x");
        assert!(matches!(
            ClientEntry::try_from(&records[0]),
            Err(ProtocolError::InvalidField { .. })
        ));
    }
}
