use std::net::IpAddr;
use std::path::Path;

use maxminddb::{MaxMindDBError, Reader, geoip2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoIpError {
    #[error("failed to open ISP database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: MaxMindDBError,
    },
    #[error("ISP lookup for {ip} failed: {source}")]
    Lookup {
        ip: IpAddr,
        #[source]
        source: MaxMindDBError,
    },
}

/// Resolves the network operator behind an IP address
pub trait IspLookup: Send + Sync {
    /// Empty string when the database knows the address but names no operator
    fn lookup_isp(&self, ip: IpAddr) -> Result<String, GeoIpError>;
}

/// MaxMind GeoIP2/GeoLite2 ISP database
pub struct MaxMindIsp {
    reader: Reader<Vec<u8>>,
}

impl MaxMindIsp {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GeoIpError> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path)
            .map_err(|source| GeoIpError::Open { path: path.display().to_string(), source })?;
        Ok(Self { reader })
    }
}

impl IspLookup for MaxMindIsp {
    fn lookup_isp(&self, ip: IpAddr) -> Result<String, GeoIpError> {
        let record = self
            .reader
            .lookup::<geoip2::Isp>(ip)
            .map_err(|source| GeoIpError::Lookup { ip, source })?;

        let name = record
            .isp
            .or(record.organization)
            .or(record.autonomous_system_organization)
            .unwrap_or_default();
        Ok(name.to_string())
    }
}

/// Used when no ISP database is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIsp;

impl IspLookup for DisabledIsp {
    fn lookup_isp(&self, _ip: IpAddr) -> Result<String, GeoIpError> {
        Ok(String::new())
    }
}
