// Copyright 2025 The kmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

use crate::host::{StreamInfo, DESTINATION_ADDRESS_PROPERTY, LISTENER_DIRECTION_PROPERTY};
use ipnet::IpNet;
use prose_configuration::SidecarDirection;
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectionError {
    #[error("listener direction is not available")]
    Missing,
    #[error("listener direction '{0}' is not a number")]
    NotANumber(String),
    #[error("listener direction is unspecified, gateways are not supported")]
    Unspecified,
    #[error("unknown listener direction {0}")]
    Unknown(i64),
    #[error("listener is {listener} but the filter is configured for {configured}")]
    Mismatch { configured: Direction, listener: Direction },
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    /// Reads the direction of the listener owning the stream.
    pub fn resolve(info: &dyn StreamInfo) -> Result<Self, DirectionError> {
        Self::from_property(info.property(LISTENER_DIRECTION_PROPERTY).as_deref())
    }

    pub fn from_property(raw: Option<&str>) -> Result<Self, DirectionError> {
        let raw = raw.map(str::trim).filter(|r| !r.is_empty()).ok_or(DirectionError::Missing)?;
        match raw.parse::<i64>() {
            Ok(1) => Ok(Self::Inbound),
            Ok(2) => Ok(Self::Outbound),
            Ok(0) => Err(DirectionError::Unspecified),
            Ok(other) => Err(DirectionError::Unknown(other)),
            Err(_) => Err(DirectionError::NotANumber(raw.to_owned())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SidecarDirection> for Direction {
    fn from(direction: SidecarDirection) -> Self {
        match direction {
            SidecarDirection::SidecarInbound => Self::Inbound,
            SidecarDirection::SidecarOutbound => Self::Outbound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Another workload of the mesh.
    Internal(IpAddr),
    /// Anything else, sending data there is data sharing.
    External(IpAddr),
}

impl Destination {
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal(_) => "internal",
            Self::External(_) => "external",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    #[error("destination address is not available")]
    Missing,
    #[error("malformed destination address '{0}'")]
    Malformed(String),
}

pub fn classify_destination(info: &dyn StreamInfo, internal_cidrs: &[IpNet]) -> Result<Destination, DestinationError> {
    let raw = info.property(DESTINATION_ADDRESS_PROPERTY).ok_or(DestinationError::Missing)?;
    let addr = parse_address(&raw)?;
    Ok(if internal_cidrs.iter().any(|net| net.contains(&addr)) {
        Destination::Internal(addr)
    } else {
        Destination::External(addr)
    })
}

fn parse_address(raw: &str) -> Result<IpAddr, DestinationError> {
    let raw = raw.trim();
    if let Ok(sock) = raw.parse::<SocketAddr>() {
        return Ok(sock.ip());
    }
    let bare = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')).unwrap_or(raw);
    bare.parse::<IpAddr>().map_err(|_| DestinationError::Malformed(raw.to_owned()))
}
