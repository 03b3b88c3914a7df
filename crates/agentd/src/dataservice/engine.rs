//! Request dispatcher.
//!
//! Decodes a request packet, authorizes it against the receiving handle's
//! capability set, executes it against the store, and encodes the
//! response. Authorization failures produce a well-formed *not-authorized*
//! response with no side effects; the socket stays open.

use super::context::{ChildArena, RootContext, derive_child_caps};
use super::store::{BlockStore, MemoryStore, StoreError};
use agentd_wire::bitcap::BitCap;
use agentd_wire::dataservice::caps::ApiCap;
use agentd_wire::dataservice::request::{Method, Request};
use agentd_wire::dataservice::response;
use agentd_wire::dataservice::CodecError;
use agentd_wire::inet::{put_u32, take_u32};
use agentd_wire::status::{STATUS_SUCCESS, Service, data, error_status};

/// Opens a store for a root context.
pub type StoreFactory = Box<dyn Fn(&str) -> Box<dyn BlockStore>>;

/// The data service engine: service capabilities, the optional root
/// context, and the child arena.
pub struct Engine {
    service_caps: BitCap,
    root: Option<RootContext>,
    children: ChildArena,
    open_store: StoreFactory,
}

impl Engine {
    /// An engine that opens stores through `open_store`.
    pub fn new(open_store: StoreFactory) -> Engine {
        Engine {
            service_caps: BitCap::all(),
            root: None,
            children: ChildArena::new(),
            open_store,
        }
    }

    /// An engine backed by the in-memory store.
    pub fn with_memory_store() -> Engine {
        Engine::new(Box::new(|data_dir| Box::new(MemoryStore::open(data_dir))))
    }

    /// Reduces the service-level capability set that gates root-context
    /// creation before any root exists.
    pub fn reduce_service_caps(&mut self, mask: &BitCap) {
        self.service_caps = self.service_caps.intersect(mask);
    }

    /// Handles one request packet, producing one response packet.
    pub fn handle(&mut self, raw: &[u8]) -> Vec<u8> {
        let request = match Request::decode(raw) {
            Ok(request) => request,
            Err(e) => return decode_failure_response(raw, &e),
        };

        let method = request.method();
        let offset = request.offset();
        match self.dispatch(request) {
            Ok(body) => response::encode(method, offset, STATUS_SUCCESS, &body),
            Err(status) => response::encode(method, offset, status, &[]),
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Vec<u8>, u32> {
        match request {
            Request::RootContextInit { data_dir } => self.root_context_init(&data_dir),
            Request::RootContextReduceCaps { caps } => self.root_reduce_caps(&caps),
            Request::ChildContextCreate { caps } => self.child_create(&caps),
            Request::ChildContextClose { child } => self.child_close(child),
            Request::GlobalSettingRead { child, key } => {
                self.authorize(child, Method::GlobalSettingRead)?;
                let value = self
                    .store()?
                    .global_setting(key)
                    .ok_or(err(data::NOT_FOUND))?;
                Ok(value)
            }
            Request::GlobalSettingWrite { child, key, value } => {
                self.authorize(child, Method::GlobalSettingWrite)?;
                self.store_mut()?
                    .set_global_setting(key, &value)
                    .map_err(store_err)?;
                Ok(Vec::new())
            }
            Request::BlockIdLatestRead { child } => {
                self.authorize(child, Method::BlockIdLatestRead)?;
                let id = self
                    .store()?
                    .latest_block_id()
                    .ok_or(err(data::NOT_FOUND))?;
                Ok(id.to_vec())
            }
            Request::BlockIdByHeightRead { child, height } => {
                self.authorize(child, Method::BlockIdByHeightRead)?;
                let id = self
                    .store()?
                    .block_id_by_height(height)
                    .ok_or(err(data::NOT_FOUND))?;
                Ok(id.to_vec())
            }
            Request::BlockRead { child, block_id } => {
                self.authorize(child, Method::BlockRead)?;
                let block = self
                    .store()?
                    .block_by_id(&block_id)
                    .ok_or(err(data::NOT_FOUND))?;
                Ok(block.to_bytes())
            }
            Request::BlockWrite {
                child,
                block_id,
                cert,
            } => {
                self.authorize(child, Method::BlockWrite)?;
                self.store_mut()?
                    .write_block(block_id, &cert)
                    .map_err(store_err)?;
                Ok(Vec::new())
            }
            Request::TransactionRead { child, txn_id } => {
                self.authorize(child, Method::TransactionRead)?;
                let store = self.store()?;
                let txn = store
                    .queued_transaction(&txn_id)
                    .or_else(|| store.canonized_transaction(&txn_id))
                    .ok_or(err(data::NOT_FOUND))?;
                Ok(txn.to_bytes())
            }
            Request::TransactionSubmit {
                child,
                txn_id,
                artifact_id,
                cert,
            } => {
                self.authorize(child, Method::TransactionSubmit)?;
                self.store_mut()?
                    .submit_transaction(txn_id, artifact_id, &cert)
                    .map_err(store_err)?;
                Ok(Vec::new())
            }
            Request::TransactionFirstRead { child } => {
                self.authorize(child, Method::TransactionFirstRead)?;
                let txn = self
                    .store()?
                    .first_queued_transaction()
                    .ok_or(err(data::NOT_FOUND))?;
                Ok(txn.to_bytes())
            }
            Request::TransactionPromote { child, txn_id } => {
                self.authorize(child, Method::TransactionPromote)?;
                self.store_mut()?
                    .promote_transaction(&txn_id)
                    .map_err(store_err)?;
                Ok(Vec::new())
            }
            Request::ArtifactRead { child, artifact_id } => {
                self.authorize(child, Method::ArtifactRead)?;
                let artifact = self
                    .store()?
                    .artifact(&artifact_id)
                    .ok_or(err(data::NOT_FOUND))?;
                Ok(artifact.to_bytes())
            }
        }
    }

    fn root_context_init(&mut self, data_dir: &str) -> Result<Vec<u8>, u32> {
        if !self.service_caps.is_set(ApiCap::RootContextCreate) {
            return Err(err(data::NOT_AUTHORIZED));
        }
        if self.root.is_some() {
            return Err(err(data::ROOT_CONTEXT_EXISTS));
        }
        if data_dir.is_empty() {
            return Err(err(data::INVALID_PARAMETER));
        }
        self.root = Some(RootContext::new((self.open_store)(data_dir)));
        Ok(Vec::new())
    }

    fn root_reduce_caps(&mut self, mask: &BitCap) -> Result<Vec<u8>, u32> {
        let root = self.root.as_mut().ok_or(err(data::NO_ROOT_CONTEXT))?;
        if !root.caps.is_set(ApiCap::RootContextReduceCaps) {
            return Err(err(data::NOT_AUTHORIZED));
        }
        root.reduce_caps(mask);
        Ok(Vec::new())
    }

    fn child_create(&mut self, mask: &BitCap) -> Result<Vec<u8>, u32> {
        let root = self.root.as_ref().ok_or(err(data::NO_ROOT_CONTEXT))?;
        if !root.caps.is_set(ApiCap::ChildContextCreate) {
            return Err(err(data::NOT_AUTHORIZED));
        }
        // A mask without the create bit is the signature of a child trying
        // to recreate itself through a replayed template.
        if !mask.is_set(ApiCap::ChildContextCreate) {
            return Err(err(data::NOT_AUTHORIZED));
        }

        let caps = derive_child_caps(&root.caps, mask);
        let offset = self
            .children
            .allocate(caps)
            .ok_or(err(data::CHILD_LIMIT))?;

        let mut body = Vec::with_capacity(4);
        put_u32(&mut body, offset);
        Ok(body)
    }

    fn child_close(&mut self, child: u32) -> Result<Vec<u8>, u32> {
        let caps = self
            .children
            .get(child)
            .ok_or(err(data::CHILD_NOT_FOUND))?;
        if !caps.is_set(ApiCap::ChildContextClose) {
            return Err(err(data::NOT_AUTHORIZED));
        }
        self.children.close(child);
        Ok(Vec::new())
    }

    fn authorize(&self, child: u32, method: Method) -> Result<(), u32> {
        let caps = self
            .children
            .get(child)
            .ok_or(err(data::CHILD_NOT_FOUND))?;
        if !caps.is_set(method.required_cap()) {
            return Err(err(data::NOT_AUTHORIZED));
        }
        Ok(())
    }

    fn store(&self) -> Result<&dyn BlockStore, u32> {
        self.root
            .as_ref()
            .map(|r| r.store.as_ref())
            .ok_or(err(data::NO_ROOT_CONTEXT))
    }

    fn store_mut(&mut self) -> Result<&mut Box<dyn BlockStore>, u32> {
        self.root
            .as_mut()
            .map(|r| &mut r.store)
            .ok_or(err(data::NO_ROOT_CONTEXT))
    }
}

fn err(reason: u16) -> u32 {
    error_status(Service::Data, reason)
}

fn store_err(e: StoreError) -> u32 {
    match e {
        StoreError::NotFound => err(data::NOT_FOUND),
        StoreError::Duplicate | StoreError::Invalid => err(data::STORE_FAILURE),
    }
}

/// Builds a response for a request that did not decode.
///
/// The method word is echoed verbatim when present so the caller can still
/// correlate; the offset is zero because no child index was recovered.
fn decode_failure_response(raw: &[u8], e: &CodecError) -> Vec<u8> {
    let status = match e {
        CodecError::InvalidSize => err(data::INVALID_SIZE),
        CodecError::InvalidParameter => err(data::INVALID_PARAMETER),
        CodecError::UnknownMethod(_) | CodecError::UnexpectedMethod { .. } => {
            err(data::UNEXPECTED_METHOD)
        }
    };
    let method_word = take_u32(raw).map_or(0, |(m, _)| m);

    let mut out = Vec::with_capacity(12);
    put_u32(&mut out, method_word);
    put_u32(&mut out, 0);
    put_u32(&mut out, status);
    out
}
