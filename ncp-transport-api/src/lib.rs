// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The external-collaborator surface spec.md §1 and §6 describe but
//! declares out of scope: typed per-property request/reply stubs, and the
//! queueing shape a "safe" multi-task dispatcher would use to serialize
//! calls from other tasks onto the single request slot `ncp-transport`'s
//! driver task allows (spec §5). This crate exists only so `Driver`'s
//! public API has a realistic caller; it does not implement a shell CLI, a
//! real task-to-task IPC transport, or the on-chip OpenThread variant.
#![cfg_attr(not(test), no_std)]

use heapless::Deque;

pub use ncp_transport::events::{
    CHILD_TABLE_CHANGED, IPV6_ADDRESS_TABLE_CHANGED, IPV6_MULTICAST_ADDRESS_TABLE_CHANGED,
    ROLE_CHANGED,
};
pub use ncp_transport::{Command, Error, Event, NetRole, Packer, Unpacker};

/// One of the representative typed property requests the upper stack issues
/// against the driver (spec §6's "≈90 typed properties"). Not exhaustive —
/// a stand-in for the per-property stub generation the real client crate
/// would carry, covering enough of the dictionary to exercise every shape
/// (bare get, bool set/get, a UTF-8 get).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyRequest {
    GetNcpVersion,
    GetNetRole,
    GetNetIfUp,
    SetNetIfUp(bool),
    GetNetStackUp,
    SetNetStackUp(bool),
    GetAllowLocalNetDataChange,
    SetAllowLocalNetDataChange(bool),
    SetHostPowerState { low_power: bool },
}

/// A decoded property response. Borrows from the frame's argument scratch
/// buffer the same way `ncp_transport::Unpacker` does, so it's only valid
/// until the driver's next decoded frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue<'a> {
    Utf8(&'a str),
    NetRole(NetRole),
    Bool(bool),
    Unit,
}

impl PropertyRequest {
    pub fn command(&self) -> Command {
        use PropertyRequest::*;
        match self {
            GetNcpVersion | GetNetRole | GetNetIfUp | GetNetStackUp | GetAllowLocalNetDataChange => {
                Command::PropValueGet
            }
            SetNetIfUp(_) | SetNetStackUp(_) | SetAllowLocalNetDataChange(_) | SetHostPowerState { .. } => {
                Command::PropValueSet
            }
        }
    }

    pub fn key(&self) -> u32 {
        use ncp_transport::properties::*;
        use PropertyRequest::*;
        match self {
            GetNcpVersion => KEY_NCP_VERSION,
            GetNetRole => KEY_NET_ROLE,
            GetNetIfUp | SetNetIfUp(_) => KEY_NET_IF_UP,
            GetNetStackUp | SetNetStackUp(_) => KEY_NET_STACK_UP,
            GetAllowLocalNetDataChange | SetAllowLocalNetDataChange(_) => KEY_ALLOW_LOCAL_NET_DATA_CHANGE,
            SetHostPowerState { .. } => KEY_HOST_POWER_STATE,
        }
    }

    /// Encodes this request's arguments. Empty for every `Get*` variant.
    pub fn encode_args(&self, packer: &mut Packer<'_>) -> Result<(), Error> {
        use PropertyRequest::*;
        match self {
            SetNetIfUp(v) | SetNetStackUp(v) | SetAllowLocalNetDataChange(v) => packer.bool(*v),
            SetHostPowerState { low_power } => packer.bool(*low_power),
            _ => Ok(()),
        }
    }

    /// Decodes a successful response's arguments per this request's shape.
    pub fn decode_response<'a>(&self, args: &mut Unpacker<'a>) -> Result<PropertyValue<'a>, Error> {
        use PropertyRequest::*;
        match self {
            GetNcpVersion => Ok(PropertyValue::Utf8(args.utf8()?)),
            GetNetRole => {
                let role = NetRole::from_wire(args.packed_uint()?).ok_or(Error::Parse)?;
                Ok(PropertyValue::NetRole(role))
            }
            GetNetIfUp | GetNetStackUp | GetAllowLocalNetDataChange => Ok(PropertyValue::Bool(args.bool()?)),
            _ => Ok(PropertyValue::Unit),
        }
    }
}

/// Stands in for a real task identifier (spec §9: "treated as a caller that
/// posts a command event and blocks on a completion mailbox").
pub type ClientTag = u8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueuedRequest {
    pub client: ClientTag,
    pub request: PropertyRequest,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Ok,
    Failed(Error),
}

/// Serializes typed property calls from multiple callers onto the single
/// request slot the driver task allows (spec §5). This is only the
/// queueing/matching shape; a real dispatcher backs `next_to_issue`/
/// `complete` with task-to-task IPC and runs on whichever task actually
/// owns the `ncp_transport::Driver`.
pub struct Dispatcher<const N: usize> {
    pending: Deque<QueuedRequest, N>,
    in_flight: Option<ClientTag>,
    completions: Deque<(ClientTag, Completion), N>,
}

impl<const N: usize> Dispatcher<N> {
    pub fn new() -> Self {
        Self {
            pending: Deque::new(),
            in_flight: None,
            completions: Deque::new(),
        }
    }

    pub fn submit(&mut self, client: ClientTag, request: PropertyRequest) -> Result<(), Error> {
        self.pending
            .push_back(QueuedRequest { client, request })
            .map_err(|_| Error::NoBuffers)
    }

    /// Pops the next queued request to actually issue, if no caller is
    /// already waiting on the single in-flight slot.
    pub fn next_to_issue(&mut self) -> Option<QueuedRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        let queued = self.pending.pop_front()?;
        self.in_flight = Some(queued.client);
        Some(queued)
    }

    /// Records the in-flight request's outcome and frees the slot for the
    /// next queued caller.
    pub fn complete(&mut self, outcome: Completion) -> Result<(), Error> {
        let client = self.in_flight.take().ok_or(Error::InvalidState)?;
        self.completions
            .push_back((client, outcome))
            .map_err(|_| Error::NoBuffers)
    }

    pub fn take_completion(&mut self) -> Option<(ClientTag, Completion)> {
        self.completions.pop_front()
    }
}

impl<const N: usize> Default for Dispatcher<N> {
    fn default() -> Self {
        Self::new()
    }
}
