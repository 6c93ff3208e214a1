//! Owned Escher record tree.
//!
//! A drawing record holds a forest of Escher records. Atoms own their data;
//! containers own their children. A container's declared length can exceed
//! the bytes present in one drawing record: the missing bytes either live
//! in later drawing records (the container is `open`) or stand for one of
//! the two 8-byte paddings the length engine knows about.

use super::record::{EscherError, EscherHeader, EscherResult, HEADER_SIZE};
use super::types::{EscherRecordType, property_id, shape_type};

/// Leaf record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscherAtom {
    pub header: EscherHeader,
    pub data: Vec<u8>,
}

impl EscherAtom {
    pub fn new(version: u8, instance: u16, record_type: u16, data: Vec<u8>) -> Self {
        EscherAtom {
            header: EscherHeader::new(version, instance, record_type, data.len() as u32),
            data,
        }
    }
}

/// Container record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscherContainer {
    pub header: EscherHeader,
    pub children: Vec<EscherNode>,
    /// Counts one extra header for deleted-shape history
    pub has_undo_info: bool,
    /// Counts the attached-text record that trails the shape in the next
    /// drawing record
    pub has_attached_text: bool,
    /// Declared length reaches into later drawing records
    pub open: bool,
}

impl EscherContainer {
    pub fn new(record_type: EscherRecordType, instance: u16) -> Self {
        EscherContainer {
            header: EscherHeader::container(record_type.into(), instance),
            children: Vec::new(),
            has_undo_info: false,
            has_attached_text: false,
            open: false,
        }
    }

    pub fn with_child(mut self, child: impl Into<EscherNode>) -> Self {
        self.children.push(child.into());
        self
    }

    #[inline]
    pub fn kind(&self) -> EscherRecordType {
        self.header.kind()
    }

    pub fn child(&self, kind: EscherRecordType) -> Option<&EscherNode> {
        self.children.iter().find(|c| c.kind() == kind)
    }

    pub fn child_mut(&mut self, kind: EscherRecordType) -> Option<&mut EscherNode> {
        self.children.iter_mut().find(|c| c.kind() == kind)
    }

    /// Data of the first child atom of `kind`.
    pub fn atom_data(&self, kind: EscherRecordType) -> Option<&[u8]> {
        match self.child(kind)? {
            EscherNode::Atom(atom) => Some(&atom.data),
            EscherNode::Container(_) => None,
        }
    }

    /// Shape type from the `Sp` child, if any.
    pub fn shape_type(&self) -> Option<u16> {
        self.child(EscherRecordType::Sp).map(|sp| sp.header().instance)
    }

    /// Shape id from the `Sp` child, if any.
    pub fn shape_id(&self) -> Option<u32> {
        let data = self.atom_data(EscherRecordType::Sp)?;
        Some(u32::from_le_bytes(data.get(0..4)?.try_into().ok()?))
    }

    /// Whether the `Opt` child sets property `id`.
    pub fn has_property(&self, id: u16) -> bool {
        let Some(EscherNode::Atom(opt)) = self.child(EscherRecordType::Opt) else {
            return false;
        };
        let count = usize::from(opt.header.instance);
        opt.data
            .chunks_exact(6)
            .take(count)
            .any(|entry| u16::from_le_bytes([entry[0], entry[1]]) & 0x3FFF == id)
    }

    /// Shapes that own text which trails them in a separate drawing record.
    fn owns_attached_text(&self) -> bool {
        self.kind() == EscherRecordType::SpContainer
            && self.child(EscherRecordType::ClientTextbox).is_none()
            && (self.shape_type() == Some(shape_type::TEXT_BOX)
                || self.has_property(property_id::TEXT_ID))
    }
}

/// One Escher record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscherNode {
    Atom(EscherAtom),
    Container(EscherContainer),
}

impl From<EscherAtom> for EscherNode {
    fn from(atom: EscherAtom) -> Self {
        EscherNode::Atom(atom)
    }
}

impl From<EscherContainer> for EscherNode {
    fn from(container: EscherContainer) -> Self {
        EscherNode::Container(container)
    }
}

impl EscherNode {
    #[inline]
    pub fn header(&self) -> &EscherHeader {
        match self {
            EscherNode::Atom(atom) => &atom.header,
            EscherNode::Container(container) => &container.header,
        }
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut EscherHeader {
        match self {
            EscherNode::Atom(atom) => &mut atom.header,
            EscherNode::Container(container) => &mut container.header,
        }
    }

    #[inline]
    pub fn kind(&self) -> EscherRecordType {
        self.header().kind()
    }

    /// Declared length, excluding the header.
    #[inline]
    pub fn declared_len(&self) -> u32 {
        self.header().length
    }

    pub fn as_container(&self) -> Option<&EscherContainer> {
        match self {
            EscherNode::Container(container) => Some(container),
            EscherNode::Atom(_) => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut EscherContainer> {
        match self {
            EscherNode::Container(container) => Some(container),
            EscherNode::Atom(_) => None,
        }
    }

    /// Bytes this node occupies in its own drawing record.
    pub fn present_len(&self) -> usize {
        match self {
            EscherNode::Atom(atom) => HEADER_SIZE + atom.data.len(),
            EscherNode::Container(container) => {
                HEADER_SIZE + container.children.iter().map(EscherNode::present_len).sum::<usize>()
            },
        }
    }

    /// Serialize the node with its declared length and present children.
    pub fn write(&self, out: &mut Vec<u8>) {
        self.header().write(out);
        match self {
            EscherNode::Atom(atom) => out.extend_from_slice(&atom.data),
            EscherNode::Container(container) => {
                for child in &container.children {
                    child.write(out);
                }
            },
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.present_len());
        self.write(&mut out);
        out
    }

    /// Depth-first search for the first node of `kind`.
    pub fn find(&self, kind: EscherRecordType) -> Option<&EscherNode> {
        if self.kind() == kind {
            return Some(self);
        }
        self.as_container()?
            .children
            .iter()
            .find_map(|child| child.find(kind))
    }

    pub fn find_mut(&mut self, kind: EscherRecordType) -> Option<&mut EscherNode> {
        if self.kind() == kind {
            return Some(self);
        }
        match self {
            EscherNode::Container(container) => container
                .children
                .iter_mut()
                .find_map(|child| child.find_mut(kind)),
            EscherNode::Atom(_) => None,
        }
    }
}

/// Serialize a forest in order.
pub fn forest_to_bytes(nodes: &[EscherNode]) -> Vec<u8> {
    let mut out = Vec::new();
    for node in nodes {
        node.write(&mut out);
    }
    out
}

/// Parse the Escher records of one drawing record.
///
/// An atom whose declared length runs past the data is cut to what is
/// there; the problem is reported in `warnings` and parsing goes on.
pub fn parse_forest(data: &[u8], warnings: &mut Vec<String>) -> EscherResult<Vec<EscherNode>> {
    let mut nodes = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        if data.len() - offset < HEADER_SIZE {
            warnings.push(format!(
                "{} stray bytes after the last Escher record",
                data.len() - offset
            ));
            break;
        }
        let (node, used) = parse_node(data, offset, warnings)?;
        nodes.push(node);
        offset += used;
    }
    Ok(nodes)
}

fn parse_node(data: &[u8], offset: usize, warnings: &mut Vec<String>) -> EscherResult<(EscherNode, usize)> {
    let header = EscherHeader::parse(data, offset)?;
    let start = offset + HEADER_SIZE;
    let available = data.len() - start;
    let declared = header.length as usize;

    if !header.is_container() {
        let mut header = header;
        let end = if declared > available {
            warnings.push(
                EscherError::TruncatedAtom {
                    record_type: header.record_type,
                    offset,
                    declared: header.length,
                    available,
                }
                .to_string(),
            );
            header.length = available as u32;
            data.len()
        } else {
            start + declared
        };
        let atom = EscherAtom {
            header,
            data: data[start..end].to_vec(),
        };
        return Ok((EscherNode::Atom(atom), end - offset));
    }

    let end = start + declared.min(available);
    let mut children = Vec::new();
    let mut at = start;
    while at < end {
        if end - at < HEADER_SIZE {
            warnings.push(format!(
                "container 0x{:04X} ends with {} stray bytes",
                header.record_type,
                end - at
            ));
            at = end;
            break;
        }
        let (child, used) = parse_node(&data[..end], at, warnings)?;
        children.push(child);
        at += used;
    }

    let mut container = EscherContainer {
        header,
        children,
        has_undo_info: false,
        has_attached_text: false,
        open: false,
    };
    classify_gap(&mut container, declared.saturating_sub(available));
    Ok((EscherNode::Container(container), at - offset))
}

/// Explain the bytes a container declares beyond the data it holds.
///
/// The drawing format carries no marker for the two paddings, so they are
/// inferred here, once, and kept on the node:
///
/// * a shape container missing exactly one header, whose shape is a text
///   box or names a text id, is counted as owning attached text (the
///   `ClientTextbox` record that follows in the next drawing record);
/// * a container other than the drawing root that is missing exactly one
///   header and holds a group container is counted as carrying deleted-shape
///   history.
///
/// Anything else is a container that continues in later drawing records.
/// This matches the files seen so far; unusual producers can end up with a
/// different length than the authoring application would write.
fn classify_gap(container: &mut EscherContainer, gap: usize) {
    if gap == 0 {
        return;
    }
    let is_root = matches!(
        container.kind(),
        EscherRecordType::DgContainer | EscherRecordType::DggContainer
    );
    if gap == HEADER_SIZE && container.owns_attached_text() {
        container.has_attached_text = true;
    } else if gap == HEADER_SIZE
        && !is_root
        && container.child(EscherRecordType::SpgrContainer).is_some()
    {
        container.has_undo_info = true;
    } else {
        container.open = true;
    }
}
