//! Network definitions, capabilities, and known token deployments.
//!
//! This module enumerates the networks the facilitator can serve, split into the
//! EVM and SVM families, together with the per-network facts settlement needs:
//! numeric chain IDs, default RPC endpoints, gas-pricing capabilities, and the
//! statically known USDC deployments used as EIP-712 domain fallbacks.

use alloy::primitives::address;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::ops::Deref;

use crate::types::{TokenAsset, TokenDeployment, TokenDeploymentEip712};

/// Supported networks across both chain families.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Polygon PoS mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
    /// Avalanche C-Chain (chain ID 43114).
    #[serde(rename = "avalanche")]
    Avalanche,
    /// Avalanche Fuji testnet (chain ID 43113).
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
    /// Abstract mainnet (chain ID 2741), a zkStack chain.
    #[serde(rename = "abstract")]
    Abstract,
    /// Abstract testnet (chain ID 11124), a zkStack chain.
    #[serde(rename = "abstract-testnet")]
    AbstractTestnet,
    /// Sei EVM mainnet (chain ID 1329).
    #[serde(rename = "sei")]
    Sei,
    /// Sei EVM testnet (chain ID 1328).
    #[serde(rename = "sei-testnet")]
    SeiTestnet,
    /// IoTeX mainnet (chain ID 4689).
    #[serde(rename = "iotex")]
    Iotex,
    /// Peaq mainnet (chain ID 3338).
    #[serde(rename = "peaq")]
    Peaq,
    /// Solana mainnet-beta.
    #[serde(rename = "solana")]
    Solana,
    /// Solana devnet.
    #[serde(rename = "solana-devnet")]
    SolanaDevnet,
}

/// The chain family a [`Network`] belongs to, deciding which verification and
/// settlement pipeline serves it.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFamily {
    Evm,
    Solana,
}

impl From<Network> for NetworkFamily {
    fn from(network: Network) -> Self {
        match network {
            Network::Solana | Network::SolanaDevnet => NetworkFamily::Solana,
            _ => NetworkFamily::Evm,
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Network::Base => "base",
            Network::BaseSepolia => "base-sepolia",
            Network::Polygon => "polygon",
            Network::PolygonAmoy => "polygon-amoy",
            Network::Avalanche => "avalanche",
            Network::AvalancheFuji => "avalanche-fuji",
            Network::Abstract => "abstract",
            Network::AbstractTestnet => "abstract-testnet",
            Network::Sei => "sei",
            Network::SeiTestnet => "sei-testnet",
            Network::Iotex => "iotex",
            Network::Peaq => "peaq",
            Network::Solana => "solana",
            Network::SolanaDevnet => "solana-devnet",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::variants()
            .iter()
            .find(|n| n.to_string() == s)
            .copied()
            .ok_or_else(|| UnknownNetworkError(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetworkError(pub String);

impl Network {
    /// Return all known [`Network`] variants, EVM networks first.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::Polygon,
            Network::PolygonAmoy,
            Network::Avalanche,
            Network::AvalancheFuji,
            Network::Abstract,
            Network::AbstractTestnet,
            Network::Sei,
            Network::SeiTestnet,
            Network::Iotex,
            Network::Peaq,
            Network::Solana,
            Network::SolanaDevnet,
        ]
    }

    /// The chain family this network belongs to.
    pub fn family(&self) -> NetworkFamily {
        (*self).into()
    }

    /// The numeric EIP-155 chain ID, for EVM networks.
    pub fn evm_chain_id(&self) -> Option<u64> {
        let id = match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Polygon => 137,
            Network::PolygonAmoy => 80002,
            Network::Avalanche => 43114,
            Network::AvalancheFuji => 43113,
            Network::Abstract => 2741,
            Network::AbstractTestnet => 11124,
            Network::Sei => 1329,
            Network::SeiTestnet => 1328,
            Network::Iotex => 4689,
            Network::Peaq => 3338,
            Network::Solana | Network::SolanaDevnet => return None,
        };
        Some(id)
    }

    /// The genesis-hash chain reference, for SVM networks.
    pub fn svm_chain_reference(&self) -> Option<&'static str> {
        match self {
            Network::Solana => Some("5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp"),
            Network::SolanaDevnet => Some("EtWTRABZaYq6iMfeYKouRu166VU2xqa1"),
            _ => None,
        }
    }

    /// The public RPC endpoint used when no override is configured.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Base => "https://mainnet.base.org",
            Network::BaseSepolia => "https://sepolia.base.org",
            Network::Polygon => "https://polygon-rpc.com",
            Network::PolygonAmoy => "https://rpc-amoy.polygon.technology",
            Network::Avalanche => "https://api.avax.network/ext/bc/C/rpc",
            Network::AvalancheFuji => "https://api.avax-test.network/ext/bc/C/rpc",
            Network::Abstract => "https://api.mainnet.abs.xyz",
            Network::AbstractTestnet => "https://api.testnet.abs.xyz",
            Network::Sei => "https://evm-rpc.sei-apis.com",
            Network::SeiTestnet => "https://evm-rpc-testnet.sei-apis.com",
            Network::Iotex => "https://babel-api.mainnet.iotex.io",
            Network::Peaq => "https://peaq.api.onfinality.io/public",
            Network::Solana => "https://api.mainnet-beta.solana.com",
            Network::SolanaDevnet => "https://api.devnet.solana.com",
        }
    }

    /// Whether the network supports EIP-1559 fee mechanics.
    ///
    /// Legacy-gas networks get an explicit `gasPrice` on outgoing transactions.
    pub fn is_eip1559(&self) -> bool {
        !matches!(
            self,
            Network::Iotex | Network::Solana | Network::SolanaDevnet
        )
    }

    /// Whether the network is a zkStack chain requiring EIP-712-native wallet
    /// actions instead of the standard transaction signing path.
    pub fn is_eip712_native(&self) -> bool {
        matches!(self, Network::Abstract | Network::AbstractTestnet)
    }

    /// Rough block production interval, used as the minimum remaining validity
    /// an authorization must have to be worth broadcasting.
    pub fn estimated_block_time_secs(&self) -> u64 {
        match self {
            Network::Base | Network::BaseSepolia => 2,
            Network::Polygon | Network::PolygonAmoy => 2,
            Network::Avalanche | Network::AvalancheFuji => 2,
            Network::Abstract | Network::AbstractTestnet => 1,
            Network::Sei | Network::SeiTestnet => 1,
            Network::Iotex => 5,
            Network::Peaq => 6,
            Network::Solana | Network::SolanaDevnet => 1,
        }
    }
}

/// Lazily initialized known USDC deployments per network as [`USDCDeployment`].
static USDC_BASE: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").into(),
            network: Network::Base,
        },
        decimals: 6,
        eip712: TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        },
    })
});

static USDC_BASE_SEPOLIA: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e").into(),
            network: Network::BaseSepolia,
        },
        decimals: 6,
        eip712: TokenDeploymentEip712 {
            name: "USDC".into(),
            version: "2".into(),
        },
    })
});

static USDC_POLYGON: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359").into(),
            network: Network::Polygon,
        },
        decimals: 6,
        eip712: TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        },
    })
});

static USDC_POLYGON_AMOY: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: address!("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582").into(),
            network: Network::PolygonAmoy,
        },
        decimals: 6,
        eip712: TokenDeploymentEip712 {
            name: "USDC".into(),
            version: "2".into(),
        },
    })
});

static USDC_AVALANCHE: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E").into(),
            network: Network::Avalanche,
        },
        decimals: 6,
        eip712: TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        },
    })
});

static USDC_AVALANCHE_FUJI: Lazy<USDCDeployment> = Lazy::new(|| {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: address!("0x5425890298aed601595a70AB815c96711a31Bc65").into(),
            network: Network::AvalancheFuji,
        },
        decimals: 6,
        eip712: TokenDeploymentEip712 {
            name: "USD Coin".into(),
            version: "2".into(),
        },
    })
});

/// A known USDC deployment as a wrapper around [`TokenDeployment`].
#[derive(Clone, Debug)]
pub struct USDCDeployment(pub TokenDeployment);

impl Deref for USDCDeployment {
    type Target = TokenDeployment;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&USDCDeployment> for TokenDeployment {
    fn from(deployment: &USDCDeployment) -> Self {
        deployment.0.clone()
    }
}

impl USDCDeployment {
    /// Return the known USDC deployment for the given network, if any.
    ///
    /// Networks without a static entry fall back to on-chain `name()`/`version()`
    /// reads when constructing the EIP-712 domain.
    pub fn by_network<N: Borrow<Network>>(network: N) -> Option<&'static USDCDeployment> {
        match network.borrow() {
            Network::Base => Some(&USDC_BASE),
            Network::BaseSepolia => Some(&USDC_BASE_SEPOLIA),
            Network::Polygon => Some(&USDC_POLYGON),
            Network::PolygonAmoy => Some(&USDC_POLYGON_AMOY),
            Network::Avalanche => Some(&USDC_AVALANCHE),
            Network::AvalancheFuji => Some(&USDC_AVALANCHE_FUJI),
            _ => None,
        }
    }
}
