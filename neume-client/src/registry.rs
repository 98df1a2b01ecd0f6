//! Resource registry: id allocation plus response routing.
//!
//! A thin layer binding engine-side ids (nodes, buffers, control buses) to
//! the domain objects that own them, so decoded responses can be forwarded to
//! whoever asked. Allocation policy lives in the allocators; this module only
//! wires them to bindings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use neume_osc::response::{
    ControlBusSet, ControlBusSetContiguous, NodeAction, Response,
};

use crate::allocator::{AllocationError, BlockAllocator, NodeIdAllocator};

/// Receives decoded responses routed by id.
pub trait ResponseHandler: Send {
    fn handle_response(&mut self, response: &Response);
}

/// Shared handle to a bound domain object.
pub type SharedHandler = Arc<Mutex<dyn ResponseHandler + Send>>;

/// Address-space bounds and client options. Defaults mirror a stock scsynth:
/// 16384 control buses, 1024 audio buses with the first 16 reserved for
/// hardware channels, 1024 buffers, temporary node ids from 1000.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub control_bus_count: i32,
    pub audio_bus_count: i32,
    pub reserved_audio_buses: i32,
    pub buffer_count: i32,
    pub initial_node_id: i32,
    pub client_id: i32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            control_bus_count: 16384,
            audio_bus_count: 1024,
            reserved_audio_buses: 16,
            buffer_count: 1024,
            initial_node_id: 1000,
            client_id: 0,
        }
    }
}

pub struct ResourceRegistry {
    control_bus_allocator: BlockAllocator,
    audio_bus_allocator: BlockAllocator,
    buffer_allocator: BlockAllocator,
    node_id_allocator: NodeIdAllocator,
    nodes: HashMap<i32, SharedHandler>,
    buffers: HashMap<i32, SharedHandler>,
    control_buses: HashMap<i32, SharedHandler>,
}

impl ResourceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            control_bus_allocator: BlockAllocator::new(0, config.control_bus_count),
            audio_bus_allocator: BlockAllocator::new(
                config.reserved_audio_buses,
                config.audio_bus_count,
            ),
            buffer_allocator: BlockAllocator::new(0, config.buffer_count),
            node_id_allocator: NodeIdAllocator::new(config.client_id, config.initial_node_id),
            nodes: HashMap::new(),
            buffers: HashMap::new(),
            control_buses: HashMap::new(),
        }
    }

    // ─── Allocation ─────────────────────────────────────────────────

    pub fn allocate_node_id(&mut self) -> i32 {
        self.node_id_allocator.allocate(1)
    }

    pub fn allocate_node_ids(&mut self, count: i32) -> i32 {
        self.node_id_allocator.allocate(count)
    }

    pub fn allocate_permanent_node_id(&mut self) -> i32 {
        self.node_id_allocator.allocate_permanent()
    }

    pub fn free_permanent_node_id(&mut self, node_id: i32) {
        self.node_id_allocator.free_permanent(node_id);
    }

    pub fn allocate_control_buses(&mut self, count: i32) -> Result<i32, AllocationError> {
        self.control_bus_allocator.allocate(count)
    }

    pub fn allocate_audio_buses(&mut self, count: i32) -> Result<i32, AllocationError> {
        self.audio_bus_allocator.allocate(count)
    }

    pub fn allocate_buffers(&mut self, count: i32) -> Result<i32, AllocationError> {
        self.buffer_allocator.allocate(count)
    }

    /// Claim a fixed buffer id range (e.g. ids agreed with another client).
    pub fn allocate_buffers_at(&mut self, start: i32, count: i32) -> Result<i32, AllocationError> {
        self.buffer_allocator.allocate_at(start, count)
    }

    pub fn free_control_buses(&mut self, start: i32, count: i32) {
        for index in start..start + count {
            self.control_buses.remove(&index);
        }
        self.control_bus_allocator.free(start, count);
    }

    pub fn free_audio_buses(&mut self, start: i32, count: i32) {
        self.audio_bus_allocator.free(start, count);
    }

    pub fn free_buffers(&mut self, start: i32, count: i32) {
        for index in start..start + count {
            self.buffers.remove(&index);
        }
        self.buffer_allocator.free(start, count);
    }

    // ─── Bindings ───────────────────────────────────────────────────

    pub fn bind_node(&mut self, node_id: i32, handler: SharedHandler) {
        self.nodes.insert(node_id, handler);
    }

    pub fn unbind_node(&mut self, node_id: i32) -> Option<SharedHandler> {
        self.nodes.remove(&node_id)
    }

    pub fn bind_buffer(&mut self, buffer_id: i32, handler: SharedHandler) {
        self.buffers.insert(buffer_id, handler);
    }

    pub fn unbind_buffer(&mut self, buffer_id: i32) -> Option<SharedHandler> {
        self.buffers.remove(&buffer_id)
    }

    pub fn bind_control_bus(&mut self, bus_index: i32, handler: SharedHandler) {
        self.control_buses.insert(bus_index, handler);
    }

    pub fn unbind_control_bus(&mut self, bus_index: i32) -> Option<SharedHandler> {
        self.control_buses.remove(&bus_index)
    }

    pub fn has_node(&self, node_id: i32) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn has_buffer(&self, buffer_id: i32) -> bool {
        self.buffers.contains_key(&buffer_id)
    }

    pub fn has_control_bus(&self, bus_index: i32) -> bool {
        self.control_buses.contains_key(&bus_index)
    }

    /// Drop every binding, e.g. after the engine process died: stale ids must
    /// not route responses from a restarted engine to old owners.
    pub fn invalidate_all(&mut self) {
        let dropped = self.nodes.len() + self.buffers.len() + self.control_buses.len();
        self.nodes.clear();
        self.buffers.clear();
        self.control_buses.clear();
        if dropped > 0 {
            log::warn!(
                target: "neume::registry",
                "invalidated {} bindings", dropped
            );
        }
    }

    // ─── Routing ────────────────────────────────────────────────────

    /// Route one decoded response to its bound owner. Returns the response
    /// back when nothing claims it: server-wide responses (status, synced,
    /// done, fail, synthdef removed) and responses for unbound ids.
    ///
    /// Control-bus responses are split item-wise: each bound bus sees only
    /// its own items, and unowned items come back to the caller together.
    pub fn dispatch(&mut self, response: Response) -> Option<Response> {
        match response {
            Response::NodeInfo(ref info) => {
                let node_id = info.node_id;
                let ended = info.action == NodeAction::Ended;
                let claimed = self.forward_node(node_id, &response);
                if ended && self.nodes.remove(&node_id).is_some() {
                    log::debug!(target: "neume::registry", "node {} ended, unbound", node_id);
                }
                if claimed {
                    None
                } else {
                    Some(response)
                }
            }
            Response::NodeSet(ref set) => self.claim(set.node_id, response, Self::node_handler),
            Response::NodeSetContiguous(ref set) => {
                self.claim(set.node_id, response, Self::node_handler)
            }
            Response::Trigger(ref trigger) => {
                self.claim(trigger.node_id, response, Self::node_handler)
            }
            Response::QueryTree(ref root) => {
                self.claim(root.node_id(), response, Self::node_handler)
            }
            Response::BufferInfo(ref info) => {
                self.claim(info.buffer_id, response, Self::buffer_handler)
            }
            Response::BufferSet(ref set) => {
                self.claim(set.buffer_id, response, Self::buffer_handler)
            }
            Response::BufferSetContiguous(ref set) => {
                self.claim(set.buffer_id, response, Self::buffer_handler)
            }
            Response::ControlBusSet(set) => {
                let mut unclaimed = Vec::new();
                for item in set.items {
                    match self.control_buses.get(&item.bus_index) {
                        Some(handler) => {
                            let single = Response::ControlBusSet(ControlBusSet {
                                items: vec![item],
                            });
                            forward(handler, &single);
                        }
                        None => unclaimed.push(item),
                    }
                }
                if unclaimed.is_empty() {
                    None
                } else {
                    Some(Response::ControlBusSet(ControlBusSet { items: unclaimed }))
                }
            }
            Response::ControlBusSetContiguous(set) => {
                let mut unclaimed = Vec::new();
                for item in set.items {
                    match self.control_buses.get(&item.starting_bus_index) {
                        Some(handler) => {
                            let single =
                                Response::ControlBusSetContiguous(ControlBusSetContiguous {
                                    items: vec![item],
                                });
                            forward(handler, &single);
                        }
                        None => unclaimed.push(item),
                    }
                }
                if unclaimed.is_empty() {
                    None
                } else {
                    Some(Response::ControlBusSetContiguous(ControlBusSetContiguous {
                        items: unclaimed,
                    }))
                }
            }
            // Server-wide responses have no per-id owner.
            Response::Status(_)
            | Response::Synced(_)
            | Response::Done(_)
            | Response::Fail(_)
            | Response::SynthdefRemoved(_) => Some(response),
        }
    }

    fn node_handler(&self, id: i32) -> Option<&SharedHandler> {
        self.nodes.get(&id)
    }

    fn buffer_handler(&self, id: i32) -> Option<&SharedHandler> {
        self.buffers.get(&id)
    }

    fn claim(
        &mut self,
        id: i32,
        response: Response,
        lookup: fn(&Self, i32) -> Option<&SharedHandler>,
    ) -> Option<Response> {
        match lookup(self, id) {
            Some(handler) => {
                forward(handler, &response);
                None
            }
            None => {
                log::debug!(
                    target: "neume::registry",
                    "no binding for {} (id {})", response_name(&response), id
                );
                Some(response)
            }
        }
    }

    fn forward_node(&self, node_id: i32, response: &Response) -> bool {
        match self.nodes.get(&node_id) {
            Some(handler) => {
                forward(handler, response);
                true
            }
            None => false,
        }
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

fn forward(handler: &SharedHandler, response: &Response) {
    match handler.lock() {
        Ok(mut guard) => guard.handle_response(response),
        Err(_) => log::warn!(
            target: "neume::registry",
            "handler mutex poisoned, dropping response"
        ),
    }
}

fn response_name(response: &Response) -> &'static str {
    match response {
        Response::BufferInfo(_) => "buffer info",
        Response::BufferSet(_) => "buffer set",
        Response::BufferSetContiguous(_) => "buffer setn",
        Response::ControlBusSet(_) => "control bus set",
        Response::ControlBusSetContiguous(_) => "control bus setn",
        Response::NodeInfo(_) => "node info",
        Response::NodeSet(_) => "node set",
        Response::NodeSetContiguous(_) => "node setn",
        Response::QueryTree(_) => "query tree",
        Response::Status(_) => "status",
        Response::Synced(_) => "synced",
        Response::Trigger(_) => "trigger",
        Response::Done(_) => "done",
        Response::Fail(_) => "fail",
        Response::SynthdefRemoved(_) => "synthdef removed",
    }
}
