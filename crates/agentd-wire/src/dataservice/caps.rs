//! Named capability bits for the data service API.

/// One capability bit per authorizable operation.
///
/// The discriminant is the bit index inside a capability bitset. Order is
/// part of the wire contract; new capabilities append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ApiCap {
    /// Create a root context.
    RootContextCreate = 0,
    /// Further reduce capabilities on the root context.
    RootContextReduceCaps = 1,
    /// Create a child context with reduced capabilities.
    ChildContextCreate = 2,
    /// Close a child context.
    ChildContextClose = 3,
    /// Read a backup of the database.
    DatabaseBackup = 4,
    /// Restore a backup of the database.
    DatabaseRestore = 5,
    /// Upgrade the database schema.
    DatabaseUpgrade = 6,
    /// Query a global setting.
    AppGlobalSettingRead = 7,
    /// Set a global setting.
    AppGlobalSettingWrite = 8,
    /// Read the latest block id.
    AppBlockIdLatestRead = 9,
    /// Read the next block id given a block id.
    AppBlockIdNextRead = 10,
    /// Read the previous block id given a block id.
    AppBlockIdPrevRead = 11,
    /// Read the block id holding a given transaction id.
    AppBlockIdWithTransactionRead = 12,
    /// Read the block id at a given height.
    AppBlockIdByHeightRead = 13,
    /// Read a block by id.
    AppBlockRead = 14,
    /// Read a transaction by id.
    AppTransactionRead = 15,
    /// Submit a transaction to the process queue.
    AppPqTransactionSubmit = 16,
    /// Read the first transaction in the process queue.
    AppPqTransactionFirstRead = 17,
    /// Read the next transaction in the process queue.
    AppPqTransactionNextRead = 18,
    /// Promote a queued transaction.
    AppPqTransactionPromote = 19,
    /// Write a block to the block table.
    AppBlockWrite = 20,
}

impl ApiCap {
    /// Number of capability bits defined by this API.
    pub const BITS_MAX: usize = 21;
}
