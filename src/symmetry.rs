//! Unit cell, crystal system and the structure source that seeds the
//! parameter registry.

use crate::error::StructureLoadError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    pub fn lengths(&self) -> [f64; 3] {
        [self.a, self.b, self.c]
    }

    pub fn with_lengths(&self, a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c, ..*self }
    }

    /// Reciprocal basis vectors (1/Å) in a frame with `a` along x and `b` in
    /// the xy plane.
    pub fn reciprocal_basis(&self) -> [[f64; 3]; 3] {
        let (al, be, ga) = (
            self.alpha.to_radians(),
            self.beta.to_radians(),
            self.gamma.to_radians(),
        );
        let av = [self.a, 0.0, 0.0];
        let bv = [self.b * ga.cos(), self.b * ga.sin(), 0.0];
        let cx = self.c * be.cos();
        let cy = self.c * (al.cos() - be.cos() * ga.cos()) / ga.sin();
        let cz = (self.c * self.c - cx * cx - cy * cy).max(0.0).sqrt();
        let cv = [cx, cy, cz];

        let vol = dot(av, cross(bv, cv));
        let inv = if vol.abs() < 1e-12 { 0.0 } else { 1.0 / vol };
        let scale = |v: [f64; 3]| [v[0] * inv, v[1] * inv, v[2] * inv];
        [scale(cross(bv, cv)), scale(cross(cv, av)), scale(cross(av, bv))]
    }
}

fn dot(u: [f64; 3], v: [f64; 3]) -> f64 {
    u[0] * v[0] + u[1] * v[1] + u[2] * v[2]
}

fn cross(u: [f64; 3], v: [f64; 3]) -> [f64; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrystalSystem {
    Triclinic,
    Monoclinic,
    Orthorhombic,
    Tetragonal,
    Trigonal,
    Hexagonal,
    Cubic,
}

impl CrystalSystem {
    /// Classify a Hermann–Mauguin symbol as written in PDB files, e.g.
    /// `"P 43 21 2"`, `"C 1 2 1"`, `"I 2 3"`, `"R 3"`.
    pub fn from_symbol(symbol: &str) -> Self {
        let tokens: Vec<&str> = symbol.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            return CrystalSystem::Triclinic;
        };
        let lattice = first.chars().next().unwrap_or('P').to_ascii_uppercase();

        // compact form like "P21" or "R3"
        let rest: Vec<&str> = if tokens.len() == 1 {
            vec![&first[lattice.len_utf8()..]]
        } else {
            tokens[1..].to_vec()
        };
        let axis = rest.first().copied().unwrap_or("");

        if lattice == 'R' || lattice == 'H' {
            return CrystalSystem::Trigonal;
        }
        if rest.len() >= 2 && (rest[1] == "3" || rest[1] == "-3") {
            return CrystalSystem::Cubic;
        }
        if axis.contains('6') {
            return CrystalSystem::Hexagonal;
        }
        if axis.starts_with('3') || axis.starts_with("-3") {
            return CrystalSystem::Trigonal;
        }
        if axis.contains('4') {
            return CrystalSystem::Tetragonal;
        }
        if rest.len() == 3 && rest[0] == "1" && rest[2] == "1" {
            return CrystalSystem::Monoclinic;
        }
        if rest.len() >= 3 {
            return CrystalSystem::Orthorhombic;
        }
        if axis.is_empty() || axis == "1" || axis == "-1" {
            return CrystalSystem::Triclinic;
        }
        CrystalSystem::Monoclinic
    }

    /// `(independent, dependent)` pairs of unit-cell axes. A dependent axis is
    /// not adjustable and scales with its independent axis.
    pub fn axis_couplings(self) -> &'static [(&'static str, &'static str)] {
        match self {
            CrystalSystem::Cubic => &[("a", "b"), ("a", "c")],
            CrystalSystem::Tetragonal | CrystalSystem::Trigonal | CrystalSystem::Hexagonal => {
                &[("a", "b")]
            }
            _ => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    pub cell: UnitCell,
    pub space_group: String,
    pub system: CrystalSystem,
}

impl Structure {
    pub fn new(cell: UnitCell, space_group: impl Into<String>) -> Self {
        let space_group = space_group.into();
        let system = CrystalSystem::from_symbol(&space_group);
        Self {
            cell,
            space_group,
            system,
        }
    }
}

/// Where unit-cell and symmetry defaults come from.
pub trait StructureSource {
    fn load(&self) -> Result<Structure, StructureLoadError>;
    fn describe(&self) -> String;
}

/// Tetragonal hen egg-white lysozyme; used when no structure is given.
pub struct BuiltinLysozyme;

impl StructureSource for BuiltinLysozyme {
    fn load(&self) -> Result<Structure, StructureLoadError> {
        Ok(Structure::new(
            UnitCell {
                a: 79.1,
                b: 79.1,
                c: 37.9,
                alpha: 90.0,
                beta: 90.0,
                gamma: 90.0,
            },
            "P 43 21 2",
        ))
    }

    fn describe(&self) -> String {
        "built-in lysozyme".to_string()
    }
}

pub struct PdbFile {
    pub path: PathBuf,
}

impl StructureSource for PdbFile {
    fn load(&self) -> Result<Structure, StructureLoadError> {
        let text = fs::read_to_string(&self.path).map_err(|source| StructureLoadError::Io {
            path: self.path.clone(),
            source,
        })?;
        let line = text
            .lines()
            .find(|l| l.starts_with("CRYST1"))
            .ok_or_else(|| StructureLoadError::MissingCryst1 {
                path: self.path.clone(),
            })?;
        parse_cryst1(line)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse a fixed-column PDB `CRYST1` record.
pub fn parse_cryst1(line: &str) -> Result<Structure, StructureLoadError> {
    let field = |name: &'static str, start: usize, end: usize| -> Result<f64, StructureLoadError> {
        let text = column(line, start, end).trim();
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| StructureLoadError::Malformed {
                field: name,
                text: text.to_string(),
            })
    };

    let cell = UnitCell {
        a: field("a", 6, 15)?,
        b: field("b", 15, 24)?,
        c: field("c", 24, 33)?,
        alpha: field("alpha", 33, 40)?,
        beta: field("beta", 40, 47)?,
        gamma: field("gamma", 47, 54)?,
    };
    let space_group = column(line, 55, 66).trim();
    if space_group.is_empty() {
        return Err(StructureLoadError::Malformed {
            field: "space group",
            text: String::new(),
        });
    }
    Ok(Structure::new(cell, space_group))
}

fn column(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LYSOZYME: &str =
        "CRYST1   79.100   79.100   37.900  90.00  90.00  90.00 P 43 21 2     8          ";

    #[test]
    fn parses_cryst1_columns() {
        let s = parse_cryst1(LYSOZYME).unwrap();
        assert_eq!(s.cell.a, 79.1);
        assert_eq!(s.cell.c, 37.9);
        assert_eq!(s.cell.gamma, 90.0);
        assert_eq!(s.space_group, "P 43 21 2");
        assert_eq!(s.system, CrystalSystem::Tetragonal);
    }

    #[test]
    fn rejects_garbage_lengths() {
        let bad = "CRYST1   79.100   abcdef   37.900  90.00  90.00  90.00 P 43 21 2";
        match parse_cryst1(bad) {
            Err(StructureLoadError::Malformed { field, .. }) => assert_eq!(field, "b"),
            other => panic!("expected malformed b, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_space_group() {
        let short = "CRYST1   79.100   79.100   37.900  90.00  90.00  90.00";
        assert!(parse_cryst1(short).is_err());
    }

    #[test]
    fn classifies_common_space_groups() {
        use CrystalSystem::*;
        let cases = [
            ("P 1", Triclinic),
            ("C 1 2 1", Monoclinic),
            ("P 21", Monoclinic),
            ("P 21 21 21", Orthorhombic),
            ("P 43 21 2", Tetragonal),
            ("I 4", Tetragonal),
            ("P 31 2 1", Trigonal),
            ("R 3", Trigonal),
            ("H 3 2", Trigonal),
            ("P 61 2 2", Hexagonal),
            ("I 2 3", Cubic),
            ("P 43 3 2", Cubic),
            ("F 4 3 2", Cubic),
        ];
        for (symbol, expected) in cases {
            assert_eq!(CrystalSystem::from_symbol(symbol), expected, "{symbol}");
        }
    }

    #[test]
    fn cubic_ties_both_axes_to_a() {
        assert_eq!(
            CrystalSystem::Cubic.axis_couplings(),
            &[("a", "b"), ("a", "c")]
        );
        assert!(CrystalSystem::Orthorhombic.axis_couplings().is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let src = PdbFile {
            path: PathBuf::from("/nonexistent/simview/none.pdb"),
        };
        assert!(matches!(src.load(), Err(StructureLoadError::Io { .. })));
    }

    #[test]
    fn orthogonal_cell_reciprocal_basis_is_inverse_lengths() {
        let cell = UnitCell {
            a: 10.0,
            b: 20.0,
            c: 40.0,
            alpha: 90.0,
            beta: 90.0,
            gamma: 90.0,
        };
        let r = cell.reciprocal_basis();
        assert!((r[0][0] - 0.1).abs() < 1e-9);
        assert!((r[1][1] - 0.05).abs() < 1e-9);
        assert!((r[2][2] - 0.025).abs() < 1e-9);
    }
}
