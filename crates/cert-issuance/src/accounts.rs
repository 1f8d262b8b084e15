//! Deterministic account derivation for certificate mints.
//!
//! Pure functions over addresses. Seeds follow the token-metadata and
//! associated-token programs' own schemes; a mismatch here is only caught
//! when the ledger validates the transaction, so the seed layout is fixed.

use solana_sdk::instruction::AccountMeta;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::{pubkey, system_program, sysvar};

pub const SEED_METADATA: &[u8] = b"metadata";
pub const SEED_EDITION: &[u8] = b"edition";

/// Token-metadata program deployment.
pub const TOKEN_METADATA_PROGRAM_ID: Pubkey =
    pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

/// Associated-token-account program deployment.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Addresses of every program a certificate transaction touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramIds {
    pub certificate: Pubkey,
    pub token: Pubkey,
    pub token_metadata: Pubkey,
    pub associated_token: Pubkey,
    pub system: Pubkey,
    pub rent: Pubkey,
}

impl ProgramIds {
    /// Well-known deployments plus the given certificate program.
    pub fn with_certificate_program(certificate: Pubkey) -> Self {
        Self {
            certificate,
            token: spl_token::id(),
            token_metadata: TOKEN_METADATA_PROGRAM_ID,
            associated_token: ASSOCIATED_TOKEN_PROGRAM_ID,
            system: system_program::id(),
            rent: sysvar::rent::id(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let named = [
            ("certificate", self.certificate),
            ("token", self.token),
            ("token_metadata", self.token_metadata),
            ("associated_token", self.associated_token),
            ("rent", self.rent),
        ];
        for (name, id) in named {
            if id == Pubkey::default() {
                return Err(format!("{name} program address is unset"));
            }
        }
        for (i, (a_name, a)) in named.iter().enumerate() {
            for (b_name, b) in &named[i + 1..] {
                if a == b {
                    return Err(format!("{a_name} and {b_name} share address {a}"));
                }
            }
        }
        Ok(())
    }
}

/// Metadata PDA: `["metadata", program, mint]` under `program`.
pub fn derive_metadata_account(mint: &Pubkey, metadata_program: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_METADATA, metadata_program.as_ref(), mint.as_ref()],
        metadata_program,
    )
    .0
}

/// Master-edition PDA: the metadata seeds with `"edition"` appended.
pub fn derive_edition_account(mint: &Pubkey, metadata_program: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[
            SEED_METADATA,
            metadata_program.as_ref(),
            mint.as_ref(),
            SEED_EDITION,
        ],
        metadata_program,
    )
    .0
}

/// Holding (associated token) account of `owner` for `mint`.
pub fn derive_holding_account(owner: &Pubkey, mint: &Pubkey, programs: &ProgramIds) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), programs.token.as_ref(), mint.as_ref()],
        &programs.associated_token,
    )
    .0
}

/// Every account the mint instructions take, in one validated value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MintAccountSet {
    pub payer: Pubkey,
    pub metadata: Pubkey,
    pub edition: Pubkey,
    pub mint: Pubkey,
    pub holding: Pubkey,
    pub programs: ProgramIds,
}

impl MintAccountSet {
    pub fn derive(payer: Pubkey, mint: Pubkey, programs: ProgramIds) -> Result<Self, String> {
        programs.validate()?;
        if payer == mint {
            return Err("payer and mint must be distinct identities".to_string());
        }
        Ok(Self {
            payer,
            metadata: derive_metadata_account(&mint, &programs.token_metadata),
            edition: derive_edition_account(&mint, &programs.token_metadata),
            mint,
            holding: derive_holding_account(&payer, &mint, &programs),
            programs,
        })
    }

    /// Account metas in the order of the `nft_minter/v1` instruction schema.
    pub fn to_account_metas(&self) -> Vec<AccountMeta> {
        vec![
            AccountMeta::new(self.payer, true),
            AccountMeta::new(self.metadata, false),
            AccountMeta::new(self.edition, false),
            AccountMeta::new(self.mint, true),
            AccountMeta::new(self.holding, false),
            AccountMeta::new_readonly(self.programs.token, false),
            AccountMeta::new_readonly(self.programs.token_metadata, false),
            AccountMeta::new_readonly(self.programs.associated_token, false),
            AccountMeta::new_readonly(self.programs.system, false),
            AccountMeta::new_readonly(self.programs.rent, false),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs() -> ProgramIds {
        ProgramIds::with_certificate_program(Pubkey::new_unique())
    }

    #[test]
    fn metadata_and_edition_differ() {
        let mint = Pubkey::new_unique();
        let metadata = derive_metadata_account(&mint, &TOKEN_METADATA_PROGRAM_ID);
        let edition = derive_edition_account(&mint, &TOKEN_METADATA_PROGRAM_ID);
        assert_ne!(metadata, edition);
    }

    #[test]
    fn derived_addresses_are_off_curve() {
        let mint = Pubkey::new_unique();
        assert!(!derive_metadata_account(&mint, &TOKEN_METADATA_PROGRAM_ID).is_on_curve());
        assert!(!derive_edition_account(&mint, &TOKEN_METADATA_PROGRAM_ID).is_on_curve());
        let owner = Pubkey::new_unique();
        assert!(!derive_holding_account(&owner, &mint, &programs()).is_on_curve());
    }

    #[test]
    fn seed_order_matters() {
        let mint = Pubkey::new_unique();
        let (swapped, _) = Pubkey::find_program_address(
            &[SEED_METADATA, mint.as_ref(), TOKEN_METADATA_PROGRAM_ID.as_ref()],
            &TOKEN_METADATA_PROGRAM_ID,
        );
        assert_ne!(swapped, derive_metadata_account(&mint, &TOKEN_METADATA_PROGRAM_ID));
    }

    #[test]
    fn holding_account_depends_on_owner() {
        let mint = Pubkey::new_unique();
        let ids = programs();
        let a = derive_holding_account(&Pubkey::new_unique(), &mint, &ids);
        let b = derive_holding_account(&Pubkey::new_unique(), &mint, &ids);
        assert_ne!(a, b);
    }

    #[test]
    fn account_set_order_matches_schema() {
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ids = programs();
        let set = MintAccountSet::derive(payer, mint, ids).unwrap_or_else(|e| panic!("{e}"));
        let metas = set.to_account_metas();
        assert_eq!(metas.len(), 10);
        assert_eq!(metas[0].pubkey, payer);
        assert!(metas[0].is_signer && metas[0].is_writable);
        assert_eq!(metas[3].pubkey, mint);
        assert!(metas[3].is_signer);
        assert_eq!(metas[1].pubkey, set.metadata);
        assert_eq!(metas[2].pubkey, set.edition);
        assert_eq!(metas[4].pubkey, set.holding);
        assert!(metas[5..].iter().all(|m| !m.is_writable && !m.is_signer));
        assert_eq!(metas[9].pubkey, sysvar::rent::id());
    }

    #[test]
    fn account_set_rejects_unset_program() {
        let mut ids = programs();
        ids.token_metadata = Pubkey::default();
        let err = MintAccountSet::derive(Pubkey::new_unique(), Pubkey::new_unique(), ids)
            .expect_err("should reject");
        assert!(err.contains("token_metadata"));
    }

    #[test]
    fn account_set_rejects_colliding_programs() {
        let mut ids = programs();
        ids.associated_token = ids.token;
        let err = MintAccountSet::derive(Pubkey::new_unique(), Pubkey::new_unique(), ids)
            .expect_err("should reject");
        assert!(err.contains("share address"));
    }

    #[test]
    fn account_set_rejects_payer_as_mint() {
        let key = Pubkey::new_unique();
        let err = MintAccountSet::derive(key, key, programs()).expect_err("should reject");
        assert!(err.contains("distinct"));
    }
}
