//! Chiplet topology — the addressable units derived from a [`Config`].
//!
//! Mirrors the way the C64 MMU maps a flat address space onto banks: here a
//! flat `(chiplet, unit)` pair is all a command descriptor ever carries, and
//! this module is the only place that knows how many units each chiplet
//! owns and what counts as a valid address.

use crate::config::Config;

/// One digital processing element, addressed by owning chiplet and index
/// within that chiplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalPe {
    pub chiplet: u32,
    pub pe_index: u32,
}

/// One digital special-purpose unit (non-matrix ops).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalSpu {
    pub chiplet: u32,
    pub spu_index: u32,
}

/// One RRAM sub-array, addressed down to tile row/col and SA row/col.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RramSubArray {
    pub chiplet: u32,
    pub tile_row: u32,
    pub tile_col: u32,
    pub sa_row: u32,
    pub sa_col: u32,
}

/// A virtual link between two addressable endpoints, tagged with the
/// transfer direction it carries. Transfer links aren't hardware units —
/// they exist only so the Composer and spec compiler can reason about
/// "the host", "a digital chiplet", or "an RRAM chiplet" uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLink {
    pub source_addr: i32,
    pub dest_addr: i32,
    pub flag: u32,
}

/// Derived topology: how many of each addressable unit exist, and how to
/// validate a `(chiplet, unit)` pair against them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub num_digital_chiplets: u32,
    pub digital_pes_per_chiplet: u32,
    pub digital_spus_per_chiplet: u32,
    pub num_rram_chiplets: u32,
    pub rram_tiles_per_dim: u32,
    pub rram_sas_per_tile_dim: u32,
}

impl Topology {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            num_digital_chiplets: cfg.num_digital_chiplets,
            digital_pes_per_chiplet: cfg.digital_pes_per_chiplet,
            digital_spus_per_chiplet: cfg.digital_spus_per_chiplet,
            num_rram_chiplets: cfg.num_rram_chiplets,
            rram_tiles_per_dim: cfg.rram_tiles_per_dim,
            rram_sas_per_tile_dim: cfg.rram_sas_per_tile_dim,
        }
    }

    pub fn total_digital_pes(&self) -> u32 {
        self.num_digital_chiplets * self.digital_pes_per_chiplet
    }

    pub fn total_digital_spus(&self) -> u32 {
        self.num_digital_chiplets * self.digital_spus_per_chiplet
    }

    pub fn sas_per_rram_chiplet(&self) -> u32 {
        self.rram_tiles_per_dim * self.rram_tiles_per_dim
            * self.rram_sas_per_tile_dim * self.rram_sas_per_tile_dim
    }

    /// Round-robin PE selection within a digital chiplet: the `n`th unit
    /// assigned on this chiplet.
    pub fn digital_pe(&self, chiplet: u32, n: u32) -> DigitalPe {
        DigitalPe {
            chiplet,
            pe_index: n % self.digital_pes_per_chiplet.max(1),
        }
    }

    pub fn digital_spu(&self, chiplet: u32, n: u32) -> DigitalSpu {
        DigitalSpu {
            chiplet,
            spu_index: n % self.digital_spus_per_chiplet.max(1),
        }
    }

    /// Round-robin RRAM sub-array selection within a chiplet: the `n`th SA
    /// assigned on this chiplet, walking tile row, tile col, SA row, SA col
    /// in that nesting order.
    pub fn rram_sub_array(&self, chiplet: u32, n: u32) -> RramSubArray {
        let sas_per_tile = self.rram_sas_per_tile_dim.max(1) * self.rram_sas_per_tile_dim.max(1);
        let tile_idx = (n / sas_per_tile.max(1)) % (self.rram_tiles_per_dim.max(1) * self.rram_tiles_per_dim.max(1)).max(1);
        let sa_idx = n % sas_per_tile.max(1);
        let tiles_per_dim = self.rram_tiles_per_dim.max(1);
        let sas_per_tile_dim = self.rram_sas_per_tile_dim.max(1);
        RramSubArray {
            chiplet,
            tile_row: tile_idx / tiles_per_dim,
            tile_col: tile_idx % tiles_per_dim,
            sa_row: sa_idx / sas_per_tile_dim,
            sa_col: sa_idx % sas_per_tile_dim,
        }
    }

    /// Expert `e` is assigned to RRAM chiplet `e mod num_rram_chiplets`.
    /// Callers must check `num_rram_chiplets > 0` first (§ MoEGatingBlock
    /// falls back to all-digital experts when it is zero).
    pub fn expert_chiplet(&self, expert_index: u32) -> u32 {
        expert_index % self.num_rram_chiplets.max(1)
    }

    /// True if `(chiplet, unit)` is either the "not applicable" sentinel
    /// (`chiplet == -1`) or a genuine unit of the given target class.
    pub fn is_valid_unit(&self, target: crate::descriptor::Target, chiplet: i32, unit: i32) -> bool {
        use crate::descriptor::Target;
        if chiplet == -1 {
            return unit == -1;
        }
        if chiplet < 0 || unit < 0 {
            return false;
        }
        let chiplet = chiplet as u32;
        let unit = unit as u32;
        match target {
            Target::Digital => {
                chiplet < self.num_digital_chiplets
                    && (unit < self.digital_pes_per_chiplet || unit < self.digital_spus_per_chiplet)
            }
            Target::Rram => chiplet < self.num_rram_chiplets && unit < self.sas_per_rram_chiplet(),
            Target::Transfer | Target::Host => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            num_digital_chiplets: 2,
            digital_pes_per_chiplet: 4,
            digital_spus_per_chiplet: 2,
            num_rram_chiplets: 3,
            rram_tiles_per_dim: 2,
            rram_sas_per_tile_dim: 2,
            ..Config::default()
        }
    }

    #[test]
    fn round_robin_pe_wraps_within_chiplet() {
        let topo = Topology::from_config(&test_config());
        assert_eq!(topo.digital_pe(0, 0).pe_index, 0);
        assert_eq!(topo.digital_pe(0, 4).pe_index, 0);
        assert_eq!(topo.digital_pe(0, 5).pe_index, 1);
    }

    #[test]
    fn expert_chiplet_wraps_mod_num_rram_chiplets() {
        let topo = Topology::from_config(&test_config());
        assert_eq!(topo.expert_chiplet(0), 0);
        assert_eq!(topo.expert_chiplet(3), 0);
        assert_eq!(topo.expert_chiplet(4), 1);
    }

    #[test]
    fn na_unit_is_always_valid() {
        let topo = Topology::from_config(&test_config());
        assert!(topo.is_valid_unit(crate::descriptor::Target::Digital, -1, -1));
    }
}
