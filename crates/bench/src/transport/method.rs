use derive_more::Display;

/// The logical request classes issued over a session.
///
/// The discriminant doubles as the JSON-RPC `id`, so a response can always be
/// attributed to the class of request that is currently awaiting it.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `txpool_status`
    #[display("txpool_status")]
    PoolStatus = 0,
    /// `eth_sendRawTransaction`
    #[display("eth_sendRawTransaction")]
    SubmitRawTx = 1,
    /// `eth_getTransactionCount`
    #[display("eth_getTransactionCount")]
    GetNonce = 3,
    /// `eth_chainId`
    #[display("eth_chainId")]
    GetChainId = 4,
    /// `eth_getTransactionByHash`
    #[display("eth_getTransactionByHash")]
    GetTxByHash = 5,
    /// `eth_getBlockByNumber`
    #[display("eth_getBlockByNumber")]
    GetBlockByNumber = 6,
}

impl Method {
    /// All request classes.
    pub const ALL: [Self; 6] = [
        Self::PoolStatus,
        Self::SubmitRawTx,
        Self::GetNonce,
        Self::GetChainId,
        Self::GetTxByHash,
        Self::GetBlockByNumber,
    ];

    /// Correlation id used on the wire.
    pub const fn id(self) -> u64 {
        self as u64
    }

    /// Wire name of the JSON-RPC method.
    pub const fn name(self) -> &'static str {
        match self {
            Self::PoolStatus => "txpool_status",
            Self::SubmitRawTx => "eth_sendRawTransaction",
            Self::GetNonce => "eth_getTransactionCount",
            Self::GetChainId => "eth_chainId",
            Self::GetTxByHash => "eth_getTransactionByHash",
            Self::GetBlockByNumber => "eth_getBlockByNumber",
        }
    }

    /// Maps a correlation id back to its request class.
    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn ids_are_unique() {
        for (i, a) in Method::ALL.iter().enumerate() {
            for b in &Method::ALL[i + 1..] {
                assert_ne!(a.id(), b.id(), "{a} and {b} share an id");
            }
        }
    }

    #[rstest]
    #[case::pool(Method::PoolStatus)]
    #[case::raw(Method::SubmitRawTx)]
    #[case::nonce(Method::GetNonce)]
    #[case::chain(Method::GetChainId)]
    #[case::tx(Method::GetTxByHash)]
    #[case::block(Method::GetBlockByNumber)]
    fn id_round_trips(#[case] method: Method) {
        assert_eq!(Method::from_id(method.id()), Some(method));
        assert_eq!(method.to_string(), method.name());
    }

    #[test]
    fn unknown_id() {
        assert_eq!(Method::from_id(2), None);
        assert_eq!(Method::from_id(42), None);
    }
}
