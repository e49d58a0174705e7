//! Orca whirlpool adapter
//!
//! Quotes are computed from the pool's on-chain vault reserves with
//! constant-product math; swaps are built directly against the whirlpool
//! program's swap instruction. Pool metadata (vaults, tick arrays, oracle)
//! comes from a JSON registry file. When the registry cannot be loaded the
//! adapter stays constructed but every operation surfaces
//! `adapter unavailable`, letting the quote race continue on other venues.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;

use super::{submit_and_measure, Quote, SwapAdapter, SwapResult};
use crate::chain::ChainClient;
use crate::wallet::WalletClient;
use crate::{Error, Result};

/// Anchor discriminator for the whirlpool `swap` instruction.
const SWAP_DISCRIMINATOR: [u8; 8] = [0xf8, 0xc6, 0x9e, 0x91, 0xe1, 0x75, 0x87, 0xc8];

/// Price-limit sentinels: swap as far as the pool allows in each direction.
const MIN_SQRT_PRICE: u128 = 4_295_048_016;
const MAX_SQRT_PRICE: u128 = 79_226_673_515_401_279_992_447_579_055;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawPool {
    address: String,
    program_id: String,
    token_mint_a: String,
    token_mint_b: String,
    token_vault_a: String,
    token_vault_b: String,
    tick_arrays: [String; 3],
    oracle: String,
    fee_bps: u16,
}

#[derive(Debug, Clone)]
struct Whirlpool {
    address: Pubkey,
    program_id: Pubkey,
    token_mint_a: Pubkey,
    token_mint_b: Pubkey,
    token_vault_a: Pubkey,
    token_vault_b: Pubkey,
    tick_arrays: [Pubkey; 3],
    oracle: Pubkey,
    fee_bps: u16,
}

impl Whirlpool {
    fn from_raw(raw: RawPool) -> Result<Self> {
        let parse = |field: &str, value: &str| -> Result<Pubkey> {
            value.parse().map_err(|_| {
                Error::InvalidConfig(format!("orca pool {}: bad {field} `{value}`", raw.address))
            })
        };
        Ok(Self {
            address: parse("address", &raw.address)?,
            program_id: parse("programId", &raw.program_id)?,
            token_mint_a: parse("tokenMintA", &raw.token_mint_a)?,
            token_mint_b: parse("tokenMintB", &raw.token_mint_b)?,
            token_vault_a: parse("tokenVaultA", &raw.token_vault_a)?,
            token_vault_b: parse("tokenVaultB", &raw.token_vault_b)?,
            tick_arrays: [
                parse("tickArrays[0]", &raw.tick_arrays[0])?,
                parse("tickArrays[1]", &raw.tick_arrays[1])?,
                parse("tickArrays[2]", &raw.tick_arrays[2])?,
            ],
            oracle: parse("oracle", &raw.oracle)?,
            fee_bps: raw.fee_bps,
        })
    }
}

#[derive(Debug)]
pub struct OrcaAdapter {
    rpc: Arc<dyn ChainClient>,
    pools: std::result::Result<Vec<Whirlpool>, String>,
}

impl OrcaAdapter {
    /// `pools_path: None` builds an adapter that reports itself unavailable.
    pub fn new(rpc: Arc<dyn ChainClient>, pools_path: Option<&Path>) -> Self {
        let pools = match pools_path {
            None => Err("orca pool registry not configured".to_string()),
            Some(path) => Self::load_pools(path),
        };
        Self { rpc, pools }
    }

    fn load_pools(path: &Path) -> std::result::Result<Vec<Whirlpool>, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read orca pool registry {}: {e}", path.display()))?;
        let entries: Vec<RawPool> = serde_json::from_str(&raw)
            .map_err(|e| format!("orca pool registry {} is not valid: {e}", path.display()))?;
        entries
            .into_iter()
            .map(|raw| Whirlpool::from_raw(raw).map_err(|e| e.to_string()))
            .collect()
    }

    fn pools(&self) -> Result<&[Whirlpool]> {
        match &self.pools {
            Ok(pools) => Ok(pools),
            Err(reason) => Err(Error::AdapterUnavailable(reason.clone())),
        }
    }

    /// Find a pool trading the pair; the flag reports whether the swap runs
    /// A→B within that pool.
    fn find_pool(&self, input_mint: &Pubkey, output_mint: &Pubkey) -> Result<(&Whirlpool, bool)> {
        for pool in self.pools()? {
            if pool.token_mint_a == *input_mint && pool.token_mint_b == *output_mint {
                return Ok((pool, true));
            }
            if pool.token_mint_b == *input_mint && pool.token_mint_a == *output_mint {
                return Ok((pool, false));
            }
        }
        Err(Error::PoolNotFound(format!("{input_mint} -> {output_mint}")))
    }

    async fn vault_reserve(&self, vault: &Pubkey) -> Result<u64> {
        self.rpc
            .token_account_balance(vault)
            .await?
            .ok_or_else(|| Error::PoolNotFound(format!("vault {vault} does not exist")))
    }

    fn swap_instruction(
        &self,
        pool: &Whirlpool,
        wallet: &WalletClient,
        ata_a: Pubkey,
        ata_b: Pubkey,
        amount_in: u64,
        other_amount_threshold: u64,
        a_to_b: bool,
    ) -> Instruction {
        let sqrt_price_limit = if a_to_b { MIN_SQRT_PRICE + 1 } else { MAX_SQRT_PRICE - 1 };

        let mut data = Vec::with_capacity(8 + 8 + 8 + 16 + 2);
        data.extend_from_slice(&SWAP_DISCRIMINATOR);
        data.extend_from_slice(&amount_in.to_le_bytes());
        data.extend_from_slice(&other_amount_threshold.to_le_bytes());
        data.extend_from_slice(&sqrt_price_limit.to_le_bytes());
        data.push(1); // amount_specified_is_input
        data.push(a_to_b as u8);

        let accounts = vec![
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(wallet.public_key(), true),
            AccountMeta::new(pool.address, false),
            AccountMeta::new(ata_a, false),
            AccountMeta::new(pool.token_vault_a, false),
            AccountMeta::new(ata_b, false),
            AccountMeta::new(pool.token_vault_b, false),
            AccountMeta::new(pool.tick_arrays[0], false),
            AccountMeta::new(pool.tick_arrays[1], false),
            AccountMeta::new(pool.tick_arrays[2], false),
            AccountMeta::new_readonly(pool.oracle, false),
        ];

        Instruction {
            program_id: pool.program_id,
            accounts,
            data,
        }
    }
}

#[async_trait]
impl SwapAdapter for OrcaAdapter {
    fn name(&self) -> &'static str {
        "orca"
    }

    async fn quote_with_slippage(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        let (pool, a_to_b) = self.find_pool(input_mint, output_mint)?;
        let (vault_in, vault_out) = if a_to_b {
            (&pool.token_vault_a, &pool.token_vault_b)
        } else {
            (&pool.token_vault_b, &pool.token_vault_a)
        };

        let reserve_in = self.vault_reserve(vault_in).await?;
        let reserve_out = self.vault_reserve(vault_out).await?;
        let out_amount = constant_product_out(reserve_in, reserve_out, amount_in, pool.fee_bps)?;
        let other_amount_threshold =
            out_amount - out_amount * slippage_bps as u64 / 10_000;

        let amount_in_after_fee = amount_in - amount_in * pool.fee_bps as u64 / 10_000;
        let price_impact_pct = 100.0 * amount_in_after_fee as f64
            / (reserve_in as f64 + amount_in_after_fee as f64);

        Ok(Quote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: amount_in,
            out_amount,
            other_amount_threshold,
            price_impact_pct,
            provider: "orca".into(),
            raw_opaque: json!({
                "whirlpool": pool.address.to_string(),
                "aToB": a_to_b,
                "feeBps": pool.fee_bps,
            }),
        })
    }

    async fn swap(
        &self,
        wallet: &WalletClient,
        quote: &Quote,
        slippage_bps: u16,
    ) -> Result<SwapResult> {
        let input_mint: Pubkey = quote
            .input_mint
            .parse()
            .map_err(|_| Error::InvalidMint(quote.input_mint.clone()))?;
        let output_mint: Pubkey = quote
            .output_mint
            .parse()
            .map_err(|_| Error::InvalidMint(quote.output_mint.clone()))?;

        let live_quote = self
            .quote_with_slippage(&input_mint, &output_mint, quote.in_amount, slippage_bps)
            .await?;
        let (pool, a_to_b) = self.find_pool(&input_mint, &output_mint)?;

        // Both sides must exist before the program will touch them; the
        // output side is commonly fresh.
        let (mint_a, mint_b) = (pool.token_mint_a, pool.token_mint_b);
        let ata_a = wallet.get_or_create_token_account(&mint_a).await?;
        let ata_b = wallet.get_or_create_token_account(&mint_b).await?;

        let ix = self.swap_instruction(
            pool,
            wallet,
            ata_a,
            ata_b,
            live_quote.in_amount,
            live_quote.other_amount_threshold,
            a_to_b,
        );
        let tx = Transaction::new_with_payer(&[ix], Some(&wallet.public_key()));
        submit_and_measure(wallet, live_quote, tx).await
    }
}

/// x·y=k output for a fee-carrying swap, computed in u128 to avoid overflow.
fn constant_product_out(
    reserve_in: u64,
    reserve_out: u64,
    amount_in: u64,
    fee_bps: u16,
) -> Result<u64> {
    if reserve_in == 0 || reserve_out == 0 {
        return Err(Error::PoolNotFound("pool has no liquidity".into()));
    }
    let in_after_fee = amount_in as u128 * (10_000 - fee_bps as u128) / 10_000;
    let out = reserve_out as u128 * in_after_fee / (reserve_in as u128 + in_after_fee);
    u64::try_from(out).map_err(|_| Error::QuoteFailed("orca quote overflow".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockChain;
    use std::io::Write;

    fn pool_json(mint_a: &Pubkey, mint_b: &Pubkey, vault_a: &Pubkey, vault_b: &Pubkey) -> String {
        format!(
            r#"[{{
                "address": "{}",
                "programId": "{}",
                "tokenMintA": "{mint_a}",
                "tokenMintB": "{mint_b}",
                "tokenVaultA": "{vault_a}",
                "tokenVaultB": "{vault_b}",
                "tickArrays": ["{}", "{}", "{}"],
                "oracle": "{}",
                "feeBps": 30
            }}]"#,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        )
    }

    #[test]
    fn constant_product_math() {
        // 1_000 in against 1M/1M reserves with no fee: ~999 out.
        assert_eq!(constant_product_out(1_000_000, 1_000_000, 1_000, 0).unwrap(), 999);
        // Fee reduces the effective input.
        let with_fee = constant_product_out(1_000_000, 1_000_000, 1_000, 30).unwrap();
        assert!(with_fee < 999);
        // Empty pool is an error, not a zero quote.
        assert!(constant_product_out(0, 1_000_000, 1_000, 0).is_err());
    }

    #[tokio::test]
    async fn unconfigured_adapter_is_unavailable() {
        let adapter = OrcaAdapter::new(Arc::new(MockChain::new()), None);
        let err = adapter
            .quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1_000)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ADAPTER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn unreadable_registry_is_unavailable_not_a_crash() {
        let adapter = OrcaAdapter::new(
            Arc::new(MockChain::new()),
            Some(Path::new("/nonexistent/pools.json")),
        );
        let err = adapter
            .quote(&Pubkey::new_unique(), &Pubkey::new_unique(), 1_000)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ADAPTER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn quotes_from_vault_reserves_in_both_directions() {
        let chain = Arc::new(MockChain::new());
        let (mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let (vault_a, vault_b) = (Pubkey::new_unique(), Pubkey::new_unique());
        chain.set_token_account(vault_a, 1_000_000_000);
        chain.set_token_account(vault_b, 250_000_000);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(pool_json(&mint_a, &mint_b, &vault_a, &vault_b).as_bytes())
            .unwrap();
        let adapter = OrcaAdapter::new(chain, Some(file.path()));

        let forward = adapter.quote(&mint_a, &mint_b, 1_000_000).await.unwrap();
        assert_eq!(forward.provider, "orca");
        assert!(forward.out_amount > 0);
        assert!(forward.other_amount_threshold <= forward.out_amount);
        assert_eq!(forward.raw_opaque["aToB"], true);

        let reverse = adapter.quote(&mint_b, &mint_a, 1_000_000).await.unwrap();
        assert_eq!(reverse.raw_opaque["aToB"], false);
        // The a->b leg buys the scarcer asset, so its unit output is lower.
        assert!(forward.out_amount < reverse.out_amount);

        let err = adapter
            .quote(&mint_a, &Pubkey::new_unique(), 1_000)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "POOL_NOT_FOUND");
    }
}
