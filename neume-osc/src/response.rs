//! Decoding of scsynth's reply messages into typed response records.
//!
//! `decode` is a pure function from one inbound `WireMessage` to one or more
//! `Response` records. Dispatch is an exact match on the address string;
//! unknown addresses are surfaced (they indicate protocol drift), and any
//! argument-shape mismatch is an error rather than a truncated or zero-filled
//! record.

use std::fmt;

use crate::message::{WireArg, WireMessage};

/// A control addressed either by index or by name, as scsynth reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlKey {
    Index(i32),
    Name(String),
}

/// Reply to `/b_query`: one record per queried buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferInfo {
    pub buffer_id: i32,
    pub frame_count: i32,
    pub channel_count: i32,
    pub sample_rate: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferSetItem {
    pub sample_index: i32,
    pub sample_value: f32,
}

/// Reply to `/b_get`: individual samples of one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSet {
    pub buffer_id: i32,
    pub items: Vec<BufferSetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferSetContiguousItem {
    pub starting_sample_index: i32,
    pub sample_values: Vec<f32>,
}

/// Reply to `/b_getn`: contiguous sample ranges of one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSetContiguous {
    pub buffer_id: i32,
    pub items: Vec<BufferSetContiguousItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlBusSetItem {
    pub bus_index: i32,
    pub bus_value: f32,
}

/// Reply to `/c_get`: individual control bus values.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlBusSet {
    pub items: Vec<ControlBusSetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlBusSetContiguousItem {
    pub starting_bus_index: i32,
    pub bus_values: Vec<f32>,
}

/// Reply to `/c_getn`: contiguous control bus ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlBusSetContiguous {
    pub items: Vec<ControlBusSetContiguousItem>,
}

/// What a node lifecycle notification reports, derived from its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// `/n_go` — the node was created.
    Created,
    /// `/n_end` — the node ended and was removed.
    Ended,
    /// `/n_off` — the node was paused.
    TurnedOff,
    /// `/n_on` — the node was resumed.
    TurnedOn,
    /// `/n_move` — the node was moved in the tree.
    Moved,
    /// `/n_info` — reply to an explicit `/n_query`.
    Queried,
}

/// Node lifecycle notification. `head_id`/`tail_id` are present only when the
/// node is a group.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub action: NodeAction,
    pub node_id: i32,
    pub parent_id: i32,
    pub prev_id: i32,
    pub next_id: i32,
    pub is_group: bool,
    pub head_id: Option<i32>,
    pub tail_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSetItem {
    pub control: ControlKey,
    pub value: f32,
}

/// Reply to `/s_get`: individual control values of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSet {
    pub node_id: i32,
    pub items: Vec<NodeSetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSetContiguousItem {
    pub control: ControlKey,
    pub values: Vec<f32>,
}

/// Reply to `/s_getn`: contiguous control ranges of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSetContiguous {
    pub node_id: i32,
    pub items: Vec<NodeSetContiguousItem>,
}

/// One node of the engine's tree snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTreeNode {
    Group(QueryTreeGroup),
    Synth(QueryTreeSynth),
}

impl QueryTreeNode {
    pub fn node_id(&self) -> i32 {
        match self {
            QueryTreeNode::Group(group) => group.node_id,
            QueryTreeNode::Synth(synth) => synth.node_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryTreeGroup {
    pub node_id: i32,
    pub children: Vec<QueryTreeNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryTreeControl {
    pub control: ControlKey,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryTreeSynth {
    pub node_id: i32,
    pub synthdef_name: String,
    pub controls: Vec<QueryTreeControl>,
}

/// Reply to `/status`.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub ugen_count: i32,
    pub synth_count: i32,
    pub group_count: i32,
    pub synthdef_count: i32,
    pub average_cpu_usage: f32,
    pub peak_cpu_usage: f32,
    pub target_sample_rate: f32,
    pub actual_sample_rate: f32,
}

/// Reply to `/sync`.
#[derive(Debug, Clone, PartialEq)]
pub struct Synced {
    pub sync_id: i32,
}

/// `/tr` — a `SendTrig` fired inside a synth.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub node_id: i32,
    pub trigger_id: i32,
    pub trigger_value: f32,
}

/// `/done` — an asynchronous command completed.
#[derive(Debug, Clone, PartialEq)]
pub struct Done {
    pub command: String,
    pub arguments: Vec<WireArg>,
}

/// `/fail` — a command was rejected; the reason tuple is empty when the
/// engine sent none.
#[derive(Debug, Clone, PartialEq)]
pub struct Fail {
    pub failed_command: String,
    pub failed_reason: Vec<WireArg>,
}

/// `/d_removed` — a synthdef was removed from the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthdefRemoved {
    pub synthdef_name: String,
}

/// A decoded reply, one variant per address family.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    BufferInfo(BufferInfo),
    BufferSet(BufferSet),
    BufferSetContiguous(BufferSetContiguous),
    ControlBusSet(ControlBusSet),
    ControlBusSetContiguous(ControlBusSetContiguous),
    NodeInfo(NodeInfo),
    NodeSet(NodeSet),
    NodeSetContiguous(NodeSetContiguous),
    QueryTree(QueryTreeNode),
    Status(Status),
    Synced(Synced),
    Trigger(Trigger),
    Done(Done),
    Fail(Fail),
    SynthdefRemoved(SynthdefRemoved),
}

/// Why a reply could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The address matched no known reply; the raw message is carried so the
    /// caller can log or escalate it.
    UnknownResponse(WireMessage),
    /// The address was known but the argument shape did not match.
    MalformedResponse { addr: String, detail: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownResponse(message) => {
                write!(f, "unknown response address {}", message.addr)
            }
            DecodeError::MalformedResponse { addr, detail } => {
                write!(f, "malformed {} response: {}", addr, detail)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Shared positional cursor over a message's arguments.
///
/// Every decoder, including the recursive tree decoder, advances this one
/// cursor so sibling and child decodes never re-read consumed values.
struct ArgCursor<'a> {
    addr: &'a str,
    args: &'a [WireArg],
    index: usize,
}

impl<'a> ArgCursor<'a> {
    fn new(message: &'a WireMessage) -> Self {
        Self {
            addr: &message.addr,
            args: &message.args,
            index: 0,
        }
    }

    fn malformed(&self, detail: impl Into<String>) -> DecodeError {
        DecodeError::MalformedResponse {
            addr: self.addr.to_string(),
            detail: detail.into(),
        }
    }

    fn remaining(&self) -> usize {
        self.args.len() - self.index
    }

    fn is_empty(&self) -> bool {
        self.index >= self.args.len()
    }

    fn next(&mut self, what: &str) -> Result<&'a WireArg, DecodeError> {
        let arg = self
            .args
            .get(self.index)
            .ok_or_else(|| self.malformed(format!("missing {} at argument {}", what, self.index)))?;
        self.index += 1;
        Ok(arg)
    }

    fn int(&mut self, what: &str) -> Result<i32, DecodeError> {
        let index = self.index;
        match self.next(what)? {
            WireArg::Int(value) => Ok(*value),
            other => Err(self.malformed(format!(
                "expected int {} at argument {}, got {:?}",
                what, index, other
            ))),
        }
    }

    /// Control and sample values: the engine sends int or float
    /// interchangeably here, so ints are coerced.
    fn float(&mut self, what: &str) -> Result<f32, DecodeError> {
        let index = self.index;
        match self.next(what)? {
            WireArg::Float(value) => Ok(*value),
            WireArg::Int(value) => Ok(*value as f32),
            other => Err(self.malformed(format!(
                "expected float {} at argument {}, got {:?}",
                what, index, other
            ))),
        }
    }

    fn string(&mut self, what: &str) -> Result<String, DecodeError> {
        let index = self.index;
        match self.next(what)? {
            WireArg::Str(value) => Ok(value.clone()),
            other => Err(self.malformed(format!(
                "expected string {} at argument {}, got {:?}",
                what, index, other
            ))),
        }
    }

    fn control_key(&mut self, what: &str) -> Result<ControlKey, DecodeError> {
        let index = self.index;
        match self.next(what)? {
            WireArg::Int(value) => Ok(ControlKey::Index(*value)),
            WireArg::Str(value) => Ok(ControlKey::Name(value.clone())),
            other => Err(self.malformed(format!(
                "expected control index or name {} at argument {}, got {:?}",
                what, index, other
            ))),
        }
    }

    fn rest(&mut self) -> Vec<WireArg> {
        let rest = self.args[self.index..].to_vec();
        self.index = self.args.len();
        rest
    }

    /// Fixed-arity decoders call this last: trailing arguments are an error.
    fn finish(&self) -> Result<(), DecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.malformed(format!("{} trailing arguments", self.remaining())))
        }
    }
}

/// Decode one inbound reply into its typed records.
///
/// Most addresses produce exactly one record; `/b_info` fans out to one
/// record per queried buffer, which is why the success type is a `Vec`.
pub fn decode(message: &WireMessage) -> Result<Vec<Response>, DecodeError> {
    let mut cursor = ArgCursor::new(message);
    match message.addr.as_str() {
        "/b_info" => decode_buffer_info(&mut cursor),
        "/b_set" => Ok(vec![decode_buffer_set(&mut cursor)?]),
        "/b_setn" => Ok(vec![decode_buffer_setn(&mut cursor)?]),
        "/c_set" => Ok(vec![decode_control_bus_set(&mut cursor)?]),
        "/c_setn" => Ok(vec![decode_control_bus_setn(&mut cursor)?]),
        "/d_removed" => Ok(vec![decode_synthdef_removed(&mut cursor)?]),
        "/done" => Ok(vec![decode_done(&mut cursor)?]),
        "/fail" => Ok(vec![decode_fail(&mut cursor)?]),
        "/g_queryTree.reply" => Ok(vec![decode_query_tree(&mut cursor)?]),
        "/n_go" => Ok(vec![decode_node_info(&mut cursor, NodeAction::Created)?]),
        "/n_end" => Ok(vec![decode_node_info(&mut cursor, NodeAction::Ended)?]),
        "/n_off" => Ok(vec![decode_node_info(&mut cursor, NodeAction::TurnedOff)?]),
        "/n_on" => Ok(vec![decode_node_info(&mut cursor, NodeAction::TurnedOn)?]),
        "/n_move" => Ok(vec![decode_node_info(&mut cursor, NodeAction::Moved)?]),
        "/n_info" => Ok(vec![decode_node_info(&mut cursor, NodeAction::Queried)?]),
        "/n_set" => Ok(vec![decode_node_set(&mut cursor)?]),
        "/n_setn" => Ok(vec![decode_node_setn(&mut cursor)?]),
        "/status.reply" => Ok(vec![decode_status(&mut cursor)?]),
        "/synced" => Ok(vec![decode_synced(&mut cursor)?]),
        "/tr" => Ok(vec![decode_trigger(&mut cursor)?]),
        _ => Err(DecodeError::UnknownResponse(message.clone())),
    }
}

fn decode_buffer_info(cursor: &mut ArgCursor) -> Result<Vec<Response>, DecodeError> {
    let mut responses = Vec::new();
    while !cursor.is_empty() {
        responses.push(Response::BufferInfo(BufferInfo {
            buffer_id: cursor.int("buffer id")?,
            frame_count: cursor.int("frame count")?,
            channel_count: cursor.int("channel count")?,
            sample_rate: cursor.float("sample rate")?,
        }));
    }
    Ok(responses)
}

fn decode_buffer_set(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let buffer_id = cursor.int("buffer id")?;
    let mut items = Vec::new();
    while !cursor.is_empty() {
        items.push(BufferSetItem {
            sample_index: cursor.int("sample index")?,
            sample_value: cursor.float("sample value")?,
        });
    }
    Ok(Response::BufferSet(BufferSet { buffer_id, items }))
}

fn decode_buffer_setn(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let buffer_id = cursor.int("buffer id")?;
    let mut items = Vec::new();
    while !cursor.is_empty() {
        let starting_sample_index = cursor.int("starting sample index")?;
        let sample_count = cursor.int("sample count")?;
        items.push(BufferSetContiguousItem {
            starting_sample_index,
            sample_values: run_length_values(cursor, sample_count, "sample value")?,
        });
    }
    Ok(Response::BufferSetContiguous(BufferSetContiguous {
        buffer_id,
        items,
    }))
}

fn decode_control_bus_set(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let mut items = Vec::new();
    while !cursor.is_empty() {
        items.push(ControlBusSetItem {
            bus_index: cursor.int("bus index")?,
            bus_value: cursor.float("bus value")?,
        });
    }
    Ok(Response::ControlBusSet(ControlBusSet { items }))
}

fn decode_control_bus_setn(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let mut items = Vec::new();
    while !cursor.is_empty() {
        let starting_bus_index = cursor.int("starting bus index")?;
        let bus_count = cursor.int("bus count")?;
        items.push(ControlBusSetContiguousItem {
            starting_bus_index,
            bus_values: run_length_values(cursor, bus_count, "bus value")?,
        });
    }
    Ok(Response::ControlBusSetContiguous(ControlBusSetContiguous {
        items,
    }))
}

/// Consume exactly `count` values after a run-length header. A count that
/// exceeds the remaining arguments is a shape error, never a short read.
fn run_length_values(
    cursor: &mut ArgCursor,
    count: i32,
    what: &str,
) -> Result<Vec<f32>, DecodeError> {
    if count < 0 {
        return Err(cursor.malformed(format!("negative {} count {}", what, count)));
    }
    if count as usize > cursor.remaining() {
        return Err(cursor.malformed(format!(
            "{} count {} exceeds {} remaining arguments",
            what,
            count,
            cursor.remaining()
        )));
    }
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(cursor.float(what)?);
    }
    Ok(values)
}

fn decode_synthdef_removed(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let synthdef_name = cursor.string("synthdef name")?;
    cursor.finish()?;
    Ok(Response::SynthdefRemoved(SynthdefRemoved { synthdef_name }))
}

fn decode_done(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let command = cursor.string("completed command")?;
    let arguments = cursor.rest();
    Ok(Response::Done(Done { command, arguments }))
}

fn decode_fail(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let failed_command = cursor.string("failed command")?;
    let failed_reason = cursor.rest();
    Ok(Response::Fail(Fail {
        failed_command,
        failed_reason,
    }))
}

fn decode_query_tree(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let control_flag = cursor.int("control flag")? != 0;
    let root = decode_tree_node(cursor, control_flag)?;
    cursor.finish()?;
    Ok(Response::QueryTree(root))
}

/// Pre-order tree decode. Each node header is `(node_id, child_count)`;
/// `child_count == -1` marks a synth leaf, any non-negative count a group
/// whose children follow immediately in the argument stream.
fn decode_tree_node(
    cursor: &mut ArgCursor,
    control_flag: bool,
) -> Result<QueryTreeNode, DecodeError> {
    let node_id = cursor.int("node id")?;
    let child_count = cursor.int("child count")?;
    if child_count == -1 {
        let synthdef_name = cursor.string("synthdef name")?;
        let mut controls = Vec::new();
        if control_flag {
            let control_count = cursor.int("control count")?;
            if control_count < 0 {
                return Err(cursor.malformed(format!(
                    "negative control count {} for node {}",
                    control_count, node_id
                )));
            }
            for _ in 0..control_count {
                controls.push(QueryTreeControl {
                    control: cursor.control_key("control")?,
                    value: cursor.float("control value")?,
                });
            }
        }
        Ok(QueryTreeNode::Synth(QueryTreeSynth {
            node_id,
            synthdef_name,
            controls,
        }))
    } else if child_count >= 0 {
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            children.push(decode_tree_node(cursor, control_flag)?);
        }
        Ok(QueryTreeNode::Group(QueryTreeGroup { node_id, children }))
    } else {
        Err(cursor.malformed(format!(
            "invalid child count {} for node {}",
            child_count, node_id
        )))
    }
}

fn decode_node_info(cursor: &mut ArgCursor, action: NodeAction) -> Result<Response, DecodeError> {
    let node_id = cursor.int("node id")?;
    let parent_id = cursor.int("parent group id")?;
    let prev_id = cursor.int("previous node id")?;
    let next_id = cursor.int("next node id")?;
    let is_group = match cursor.int("group flag")? {
        0 => false,
        1 => true,
        other => return Err(cursor.malformed(format!("group flag must be 0 or 1, got {}", other))),
    };
    let (head_id, tail_id) = if is_group {
        (
            Some(cursor.int("head node id")?),
            Some(cursor.int("tail node id")?),
        )
    } else {
        (None, None)
    };
    cursor.finish()?;
    Ok(Response::NodeInfo(NodeInfo {
        action,
        node_id,
        parent_id,
        prev_id,
        next_id,
        is_group,
        head_id,
        tail_id,
    }))
}

fn decode_node_set(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let node_id = cursor.int("node id")?;
    let mut items = Vec::new();
    while !cursor.is_empty() {
        items.push(NodeSetItem {
            control: cursor.control_key("control")?,
            value: cursor.float("control value")?,
        });
    }
    Ok(Response::NodeSet(NodeSet { node_id, items }))
}

fn decode_node_setn(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let node_id = cursor.int("node id")?;
    let mut items = Vec::new();
    while !cursor.is_empty() {
        let control = cursor.control_key("control")?;
        let control_count = cursor.int("control count")?;
        items.push(NodeSetContiguousItem {
            control,
            values: run_length_values(cursor, control_count, "control value")?,
        });
    }
    Ok(Response::NodeSetContiguous(NodeSetContiguous {
        node_id,
        items,
    }))
}

fn decode_status(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    // scsynth sends an unused leading 1.
    cursor.int("unused field")?;
    let response = Status {
        ugen_count: cursor.int("ugen count")?,
        synth_count: cursor.int("synth count")?,
        group_count: cursor.int("group count")?,
        synthdef_count: cursor.int("synthdef count")?,
        average_cpu_usage: cursor.float("average cpu usage")?,
        peak_cpu_usage: cursor.float("peak cpu usage")?,
        target_sample_rate: cursor.float("target sample rate")?,
        actual_sample_rate: cursor.float("actual sample rate")?,
    };
    cursor.finish()?;
    Ok(Response::Status(response))
}

fn decode_synced(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let sync_id = cursor.int("sync id")?;
    cursor.finish()?;
    Ok(Response::Synced(Synced { sync_id }))
}

fn decode_trigger(cursor: &mut ArgCursor) -> Result<Response, DecodeError> {
    let response = Trigger {
        node_id: cursor.int("node id")?,
        trigger_id: cursor.int("trigger id")?,
        trigger_value: cursor.float("trigger value")?,
    };
    cursor.finish()?;
    Ok(Response::Trigger(response))
}
