//! Escher record construction for sheet drawings.
//!
//! Builds the nodes a BIFF8 drawing needs: the sheet's drawing header
//! (`DgContainer` with the patriarch group), shape containers, and the
//! workbook's `Dgg` atom.

use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::record::{EscherError, EscherResult};
use super::tree::{EscherAtom, EscherContainer, EscherNode};
use super::types::{EscherRecordType, ShapeFlags, property_id, shape_type};

/// Shape atom data (8 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EscherSpData {
    pub spid: U32<LittleEndian>,
    pub flags: U32<LittleEndian>,
}

impl EscherSpData {
    pub fn new(spid: u32, flags: ShapeFlags) -> Self {
        EscherSpData {
            spid: U32::new(spid),
            flags: U32::new(flags.bits()),
        }
    }
}

/// Cell anchor of a shape (`OfficeArtClientAnchorSheet`, 18 bytes).
///
/// Offsets are in 1/1024 of the column width and 1/256 of the row height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct ClientAnchor {
    pub flags: U16<LittleEndian>,
    pub col1: U16<LittleEndian>,
    pub dx1: U16<LittleEndian>,
    pub row1: U16<LittleEndian>,
    pub dy1: U16<LittleEndian>,
    pub col2: U16<LittleEndian>,
    pub dx2: U16<LittleEndian>,
    pub row2: U16<LittleEndian>,
    pub dy2: U16<LittleEndian>,
}

impl ClientAnchor {
    /// Anchor spanning whole cells `(col1, row1)` to `(col2, row2)`.
    pub fn cells(col1: u16, row1: u16, col2: u16, row2: u16) -> Self {
        ClientAnchor {
            flags: U16::new(0),
            col1: U16::new(col1),
            dx1: U16::new(0),
            row1: U16::new(row1),
            dy1: U16::new(0),
            col2: U16::new(col2),
            dx2: U16::new(0),
            row2: U16::new(row2),
            dy2: U16::new(0),
        }
    }

    pub fn parse(data: &[u8]) -> EscherResult<Self> {
        data.get(..18)
            .and_then(|bytes| Self::read_from_bytes(bytes).ok())
            .ok_or_else(|| EscherError::Invalid(format!("client anchor needs 18 bytes, got {}", data.len())))
    }

    /// First (column, row) covered.
    pub fn top_left(&self) -> (u16, u16) {
        (self.col1.get(), self.row1.get())
    }

    /// Last (column, row) covered.
    pub fn bottom_right(&self) -> (u16, u16) {
        (self.col2.get(), self.row2.get())
    }
}

/// Drawing group header (without clusters)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct EscherDggHeader {
    /// Maximum shape ID
    spid_max: U32<LittleEndian>,
    /// Number of clusters + 1
    cidcl: U32<LittleEndian>,
    /// Number of shapes saved
    csp_saved: U32<LittleEndian>,
    /// Number of drawings saved
    cdg_saved: U32<LittleEndian>,
}

/// File ID cluster entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FileIdCluster {
    /// Drawing group ID
    pub dgid: U32<LittleEndian>,
    /// Next available shape ID in cluster
    pub cspid_cur: U32<LittleEndian>,
}

impl FileIdCluster {
    pub fn new(dgid: u32, cspid_cur: u32) -> Self {
        FileIdCluster {
            dgid: U32::new(dgid),
            cspid_cur: U32::new(cspid_cur),
        }
    }
}

/// Drawing group atom (`Dgg`) of the workbook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dgg {
    pub spid_max: u32,
    pub csp_saved: u32,
    pub cdg_saved: u32,
    pub clusters: Vec<FileIdCluster>,
}

impl Dgg {
    pub fn parse(data: &[u8]) -> EscherResult<Self> {
        let (header, rest) = EscherDggHeader::read_from_prefix(data)
            .map_err(|_| EscherError::Invalid(format!("Dgg atom needs 16 bytes, got {}", data.len())))?;
        let count = header.cidcl.get().saturating_sub(1) as usize;
        let clusters: Vec<FileIdCluster> = rest
            .chunks_exact(8)
            .take(count)
            .filter_map(|chunk| FileIdCluster::read_from_bytes(chunk).ok())
            .collect();
        Ok(Dgg {
            spid_max: header.spid_max.get(),
            csp_saved: header.csp_saved.get(),
            cdg_saved: header.cdg_saved.get(),
            clusters,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header = EscherDggHeader {
            spid_max: U32::new(self.spid_max),
            cidcl: U32::new(self.clusters.len() as u32 + 1),
            csp_saved: U32::new(self.csp_saved),
            cdg_saved: U32::new(self.cdg_saved),
        };
        let mut out = header.as_bytes().to_vec();
        for cluster in &self.clusters {
            out.extend_from_slice(cluster.as_bytes());
        }
        out
    }

    pub fn to_node(&self) -> EscherNode {
        EscherAtom::new(0, 0, EscherRecordType::Dgg.into(), self.to_bytes()).into()
    }
}

/// `Sp` atom.
pub fn sp(shape_type: u16, spid: u32, flags: ShapeFlags) -> EscherNode {
    let data = EscherSpData::new(spid, flags);
    EscherAtom::new(0x02, shape_type, EscherRecordType::Sp.into(), data.as_bytes().to_vec()).into()
}

/// `Opt` atom with simple (id, value) properties, sorted by id.
pub fn opt(properties: &[(u16, u32)]) -> EscherNode {
    let mut sorted = properties.to_vec();
    sorted.sort_by_key(|(id, _)| *id);
    let mut data = Vec::with_capacity(sorted.len() * 6);
    for (id, value) in &sorted {
        data.extend_from_slice(&id.to_le_bytes());
        data.extend_from_slice(&value.to_le_bytes());
    }
    EscherAtom::new(0x03, sorted.len() as u16, EscherRecordType::Opt.into(), data).into()
}

pub fn client_anchor(anchor: &ClientAnchor) -> EscherNode {
    EscherAtom::new(0, 0, EscherRecordType::ClientAnchor.into(), anchor.as_bytes().to_vec()).into()
}

pub fn client_data() -> EscherNode {
    EscherAtom::new(0, 0, EscherRecordType::ClientData.into(), Vec::new()).into()
}

/// The attached-text record written in its own drawing record after a
/// text shape.
pub fn client_textbox() -> EscherNode {
    EscherAtom::new(0, 0, EscherRecordType::ClientTextbox.into(), Vec::new()).into()
}

/// Shape container for a sheet shape.
pub fn shape_container(
    shape_type: u16,
    spid: u32,
    properties: &[(u16, u32)],
    anchor: &ClientAnchor,
    with_text: bool,
) -> EscherContainer {
    let mut properties = properties.to_vec();
    if with_text && !properties.iter().any(|(id, _)| *id == property_id::TEXT_ID) {
        properties.push((property_id::TEXT_ID, 0));
    }
    let mut container = EscherContainer::new(EscherRecordType::SpContainer, 0)
        .with_child(sp(shape_type, spid, ShapeFlags::HAVE_ANCHOR | ShapeFlags::HAVE_SPT))
        .with_child(opt(&properties))
        .with_child(client_anchor(anchor))
        .with_child(client_data());
    container.has_attached_text = with_text;
    container
}

/// Header tree of a new sheet drawing: `DgContainer` holding the `Dg` atom
/// and the patriarch group. Both containers are open, the shapes follow in
/// later drawing records.
pub fn drawing_header(drawing_id: u16, patriarch_spid: u32) -> EscherNode {
    let patriarch = EscherContainer::new(EscherRecordType::SpContainer, 0)
        .with_child(EscherAtom::new(0x01, 0, EscherRecordType::Spgr.into(), vec![0; 16]))
        .with_child(sp(
            shape_type::NOT_PRIMITIVE,
            patriarch_spid,
            ShapeFlags::GROUP | ShapeFlags::PATRIARCH,
        ));
    let mut group = EscherContainer::new(EscherRecordType::SpgrContainer, 0).with_child(patriarch);
    group.open = true;

    let mut dg_data = Vec::with_capacity(8);
    dg_data.extend_from_slice(&1u32.to_le_bytes());
    dg_data.extend_from_slice(&patriarch_spid.to_le_bytes());
    let mut dg = EscherContainer::new(EscherRecordType::DgContainer, 0)
        .with_child(EscherAtom::new(0, drawing_id, EscherRecordType::Dg.into(), dg_data))
        .with_child(group);
    dg.open = true;
    let mut node: EscherNode = dg.into();
    super::length::recompute(&mut node);
    node
}

/// Workbook drawing group container with a `Dgg` atom and default options.
pub fn drawing_group(dgg: &Dgg) -> EscherNode {
    let mut root = EscherContainer::new(EscherRecordType::DggContainer, 0)
        .with_child(dgg.to_node())
        .with_child(opt(&[
            (0x00BF, 0x0008_0008),
            (property_id::FILL_COLOR, 0x0800_0041),
            (property_id::LINE_COLOR, 0x0800_0040),
        ]));
    let split = [0x0800_000Du32, 0x0800_000C, 0x0800_0017, 0x1000_00F7]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    root.children.push(
        EscherAtom::new(0, 4, EscherRecordType::SplitMenuColors.into(), split).into(),
    );
    let mut node: EscherNode = root.into();
    super::length::recompute(&mut node);
    node
}
