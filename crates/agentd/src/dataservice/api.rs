//! Client API for the data service.
//!
//! Callers on the other end of a data socket use these helpers to issue
//! requests and collect responses. The blocking client serves bootstrap
//! and timer-driven callers; the non-blocking send/receive pair serves
//! event-loop callbacks. Request buffers are wiped after transmission.

use agentd_ipc::{IpcError, SocketContext, blocking};
use agentd_wire::bitcap::BitCap;
use agentd_wire::dataservice::node::{
    ArtifactRecord, BlockNode, NodeId, TransactionNode,
};
use agentd_wire::dataservice::request::{Method, Request};
use agentd_wire::dataservice::response::{
    self, ResponseHeader, decode_empty_body, decode_id_body, decode_u32_body,
};
use agentd_wire::dataservice::CodecError;
use agentd_wire::mem::wipe;
use agentd_wire::status::STATUS_SUCCESS;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Client-side API failures.
#[derive(Debug, Error)]
pub enum DataApiError {
    /// The transport failed.
    #[error("data service transport failed: {0}")]
    Ipc(#[from] IpcError),

    /// The response did not decode.
    #[error("data service response malformed: {0}")]
    Codec(#[from] CodecError),

    /// The service answered with a non-zero status.
    #[error("data service returned status 0x{0:08x}")]
    Status(u32),
}

/// Sends one request on a non-blocking socket context.
pub fn sendreq(ctx: &mut SocketContext, request: &Request) -> Result<(), DataApiError> {
    let mut raw = request.encode();
    ctx.write_data(&raw);
    wipe(&mut raw);
    Ok(())
}

/// Receives one response off a non-blocking socket context.
///
/// Would-block is surfaced through the transport error so event-loop
/// callbacks can yield and resume.
pub fn recvresp(
    ctx: &mut SocketContext,
    method: Method,
) -> Result<(ResponseHeader, Vec<u8>), DataApiError> {
    let mut raw = ctx.read_data()?;
    let result = response::expect(&raw, method).map(|(h, body)| (h, body.to_vec()));
    wipe(&mut raw);
    Ok(result?)
}

/// A blocking client over a data socket.
pub struct DataClient {
    fd: RawFd,
}

impl DataClient {
    /// Wraps a blocking data socket.
    pub fn new(fd: RawFd) -> DataClient {
        DataClient { fd }
    }

    fn call(&self, request: &Request) -> Result<(ResponseHeader, Vec<u8>), DataApiError> {
        let mut raw = request.encode();
        let write_result = blocking::write_data(self.fd, &raw);
        wipe(&mut raw);
        write_result?;

        let mut resp = blocking::read_data(self.fd)?;
        let result = response::expect(&resp, request.method()).map(|(h, body)| (h, body.to_vec()));
        wipe(&mut resp);
        Ok(result?)
    }

    fn call_checked(&self, request: &Request) -> Result<Vec<u8>, DataApiError> {
        let (header, body) = self.call(request)?;
        if header.status != STATUS_SUCCESS {
            return Err(DataApiError::Status(header.status));
        }
        Ok(body)
    }

    /// Issues a request and returns the raw response header and body
    /// without status checking. Test and diagnostic surface.
    pub fn call_raw(&self, request: &Request) -> Result<(ResponseHeader, Vec<u8>), DataApiError> {
        self.call(request)
    }

    /// Opens the root context against a data directory.
    pub fn root_context_init(&self, data_dir: &str) -> Result<(), DataApiError> {
        let body = self.call_checked(&Request::RootContextInit {
            data_dir: data_dir.to_string(),
        })?;
        decode_empty_body(&body)?;
        Ok(())
    }

    /// Monotonically reduces the root capability set.
    pub fn root_context_reduce_caps(&self, caps: &BitCap) -> Result<(), DataApiError> {
        let body = self.call_checked(&Request::RootContextReduceCaps { caps: *caps })?;
        decode_empty_body(&body)?;
        Ok(())
    }

    /// Creates a child context; returns its offset.
    pub fn child_context_create(&self, caps: &BitCap) -> Result<u32, DataApiError> {
        let body = self.call_checked(&Request::ChildContextCreate { caps: *caps })?;
        Ok(decode_u32_body(&body)?)
    }

    /// Closes a child context.
    pub fn child_context_close(&self, child: u32) -> Result<(), DataApiError> {
        let body = self.call_checked(&Request::ChildContextClose { child })?;
        decode_empty_body(&body)?;
        Ok(())
    }

    /// Reads the latest block id.
    pub fn latest_block_id(&self, child: u32) -> Result<NodeId, DataApiError> {
        let body = self.call_checked(&Request::BlockIdLatestRead { child })?;
        Ok(decode_id_body(&body)?)
    }

    /// Reads the block id at a height.
    pub fn block_id_by_height(&self, child: u32, height: u64) -> Result<NodeId, DataApiError> {
        let body = self.call_checked(&Request::BlockIdByHeightRead { child, height })?;
        Ok(decode_id_body(&body)?)
    }

    /// Reads a block by id.
    pub fn block_get(&self, child: u32, block_id: &NodeId) -> Result<BlockNode, DataApiError> {
        let body = self.call_checked(&Request::BlockRead {
            child,
            block_id: *block_id,
        })?;
        Ok(BlockNode::from_bytes(&body)?)
    }

    /// Writes a block holding every promoted transaction.
    pub fn block_write(
        &self,
        child: u32,
        block_id: &NodeId,
        cert: &[u8],
    ) -> Result<(), DataApiError> {
        let body = self.call_checked(&Request::BlockWrite {
            child,
            block_id: *block_id,
            cert: cert.to_vec(),
        })?;
        decode_empty_body(&body)?;
        Ok(())
    }

    /// Reads a transaction by id.
    pub fn transaction_get(
        &self,
        child: u32,
        txn_id: &NodeId,
    ) -> Result<TransactionNode, DataApiError> {
        let body = self.call_checked(&Request::TransactionRead {
            child,
            txn_id: *txn_id,
        })?;
        Ok(TransactionNode::from_bytes(&body)?)
    }

    /// Reads the first queued transaction.
    pub fn transaction_get_first(&self, child: u32) -> Result<TransactionNode, DataApiError> {
        let body = self.call_checked(&Request::TransactionFirstRead { child })?;
        Ok(TransactionNode::from_bytes(&body)?)
    }

    /// Submits a transaction to the process queue.
    pub fn transaction_submit(
        &self,
        child: u32,
        txn_id: &NodeId,
        artifact_id: &NodeId,
        cert: &[u8],
    ) -> Result<(), DataApiError> {
        let body = self.call_checked(&Request::TransactionSubmit {
            child,
            txn_id: *txn_id,
            artifact_id: *artifact_id,
            cert: cert.to_vec(),
        })?;
        decode_empty_body(&body)?;
        Ok(())
    }

    /// Promotes a queued transaction.
    pub fn transaction_promote(&self, child: u32, txn_id: &NodeId) -> Result<(), DataApiError> {
        let body = self.call_checked(&Request::TransactionPromote {
            child,
            txn_id: *txn_id,
        })?;
        decode_empty_body(&body)?;
        Ok(())
    }

    /// Reads a global setting.
    pub fn global_settings_get(&self, child: u32, key: u64) -> Result<Vec<u8>, DataApiError> {
        self.call_checked(&Request::GlobalSettingRead { child, key })
    }

    /// Writes a global setting.
    pub fn global_settings_set(
        &self,
        child: u32,
        key: u64,
        value: &[u8],
    ) -> Result<(), DataApiError> {
        let body = self.call_checked(&Request::GlobalSettingWrite {
            child,
            key,
            value: value.to_vec(),
        })?;
        decode_empty_body(&body)?;
        Ok(())
    }

    /// Reads an artifact record.
    pub fn artifact_get(
        &self,
        child: u32,
        artifact_id: &NodeId,
    ) -> Result<ArtifactRecord, DataApiError> {
        let body = self.call_checked(&Request::ArtifactRead {
            child,
            artifact_id: *artifact_id,
        })?;
        Ok(ArtifactRecord::from_bytes(&body)?)
    }
}
