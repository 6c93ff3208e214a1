//! Sheet drawing layer over `MSODRAWING`, `OBJ` and `TXO` records.
//!
//! A sheet's drawing is stored as a run of records:
//!
//! ```text
//! MSODRAWING  DgContainer header + first shape container
//! OBJ
//! [MSODRAWING ClientTextbox]  [TXO + CONTINUE]   (text shapes)
//! [BOF .. EOF]                                   (embedded chart)
//! MSODRAWING  next shape container
//! OBJ
//! ...
//! ```
//!
//! The header tree is kept apart from the shapes; the shape containers are
//! counted into its lengths through [`DrawingTotals`]. Shape ids come from
//! the workbook-wide [`DrawingCounters`].

use std::collections::BTreeMap;

use crate::escher::{
    self, ClientAnchor, DrawingTotals, EscherContainer, EscherNode, EscherRecordType, forest_to_bytes,
    parse_forest, shape_type, writer,
};
use crate::xls::consts::{BOF, EOF, MSODRAWING, OBJ, TXO};
use crate::xls::error::{Diagnostic, XlsError, XlsResult};
use crate::xls::records::{BiffRecord, Obj, RawRecord, Txo, obj_type};

/// Shape ids available to one drawing.
const CLUSTER_SIZE: u32 = 1024;

/// Shape bookkeeping of one drawing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawingCluster {
    /// Shapes in the drawing, the patriarch included
    pub shape_count: u32,
    /// Last shape id handed out
    pub last_shape_id: u32,
}

/// Workbook-wide shape id allocation, keyed by drawing id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawingCounters {
    clusters: BTreeMap<u16, DrawingCluster>,
}

impl DrawingCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster(&self, drawing_id: u16) -> Option<DrawingCluster> {
        self.clusters.get(&drawing_id).copied()
    }

    pub(crate) fn register(&mut self, drawing_id: u16, cluster: DrawingCluster) {
        self.clusters.insert(drawing_id, cluster);
    }

    /// Open a new drawing; returns its id and the patriarch's shape id.
    pub fn add_drawing(&mut self) -> (u16, u32) {
        let drawing_id = self.clusters.keys().next_back().map_or(1, |id| id + 1);
        let patriarch = u32::from(drawing_id) * CLUSTER_SIZE;
        self.clusters.insert(
            drawing_id,
            DrawingCluster {
                shape_count: 1,
                last_shape_id: patriarch,
            },
        );
        (drawing_id, patriarch)
    }

    /// Hand out the next shape id of a drawing.
    pub fn allocate_shape_id(&mut self, drawing_id: u16) -> XlsResult<u32> {
        let cluster = self
            .clusters
            .get_mut(&drawing_id)
            .ok_or_else(|| XlsError::not_found(format!("drawing {drawing_id}")))?;
        let next = cluster.last_shape_id + 1;
        if next >= (u32::from(drawing_id) + 1) * CLUSTER_SIZE {
            return Err(XlsError::invalid(
                MSODRAWING,
                format!("drawing {drawing_id} has no shape ids left"),
            ));
        }
        cluster.last_shape_id = next;
        cluster.shape_count += 1;
        Ok(next)
    }

    pub(crate) fn release_shape(&mut self, drawing_id: u16) {
        if let Some(cluster) = self.clusters.get_mut(&drawing_id) {
            cluster.shape_count = cluster.shape_count.saturating_sub(1).max(1);
        }
    }

    /// Regenerate the workbook's `Dgg` atom.
    pub fn dgg(&self) -> escher::Dgg {
        let spid_max = self
            .clusters
            .values()
            .map(|c| c.last_shape_id + 1)
            .max()
            .unwrap_or(CLUSTER_SIZE);
        escher::Dgg {
            spid_max,
            csp_saved: self.clusters.values().map(|c| c.shape_count).sum(),
            cdg_saved: self.clusters.len() as u32,
            clusters: self
                .clusters
                .iter()
                .map(|(id, c)| escher::FileIdCluster::new(u32::from(*id), (c.last_shape_id % CLUSTER_SIZE) + 1))
                .collect(),
        }
    }
}

/// Description of a shape to add.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShape {
    /// Escher shape type
    pub shape_type: u16,
    /// `OBJ` object type
    pub object_type: u16,
    pub anchor: ClientAnchor,
    pub text: Option<String>,
    /// Extra `Opt` properties
    pub properties: Vec<(u16, u32)>,
}

impl NewShape {
    pub fn rectangle(anchor: ClientAnchor) -> Self {
        NewShape {
            shape_type: shape_type::RECTANGLE,
            object_type: obj_type::RECTANGLE,
            anchor,
            text: None,
            properties: Vec::new(),
        }
    }

    pub fn text_box(anchor: ClientAnchor, text: &str) -> Self {
        NewShape {
            shape_type: shape_type::TEXT_BOX,
            object_type: obj_type::TEXT,
            anchor,
            text: Some(text.to_string()),
            properties: Vec::new(),
        }
    }

    /// Picture showing blip `blip_index` (1-based) of the drawing group.
    pub fn picture(anchor: ClientAnchor, blip_index: u32) -> Self {
        NewShape {
            shape_type: shape_type::PICTURE_FRAME,
            object_type: obj_type::PICTURE,
            anchor,
            text: None,
            properties: vec![(escher::property_id::BLIP_ID | 0x4000, blip_index)],
        }
    }
}

/// One shape with the BIFF records that travel with it.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingShape {
    container: EscherContainer,
    obj: Option<Obj>,
    /// Attached-text record and its `TXO`
    textbox: Option<(EscherNode, Txo)>,
    /// Records after the `OBJ` kept verbatim (embedded chart substream)
    trailing: Vec<RawRecord>,
}

impl DrawingShape {
    pub fn shape_id(&self) -> Option<u32> {
        self.container.shape_id()
    }

    pub fn shape_type(&self) -> Option<u16> {
        self.container.shape_type()
    }

    pub fn container(&self) -> &EscherContainer {
        &self.container
    }

    pub fn obj(&self) -> Option<&Obj> {
        self.obj.as_ref()
    }

    pub fn anchor(&self) -> Option<ClientAnchor> {
        let data = self.container.atom_data(EscherRecordType::ClientAnchor)?;
        ClientAnchor::parse(data).ok()
    }

    pub fn text(&self) -> Option<String> {
        self.textbox.as_ref().map(|(_, txo)| txo.text())
    }

    fn set_anchor(&mut self, anchor: &ClientAnchor) {
        match self.container.child_mut(EscherRecordType::ClientAnchor) {
            Some(node) => *node = writer::client_anchor(anchor),
            None => {
                let at = self.container.children.len().saturating_sub(1);
                self.container.children.insert(at, writer::client_anchor(anchor));
            },
        }
    }

    /// Bytes this shape adds to the drawing, header included.
    fn container_bytes(&mut self) -> u32 {
        let mut node = EscherNode::Container(std::mem::replace(
            &mut self.container,
            EscherContainer::new(EscherRecordType::SpContainer, 0),
        ));
        let len = escher::recompute(&mut node);
        if let EscherNode::Container(container) = node {
            self.container = container;
        }
        escher::HEADER_SIZE as u32 + len
    }

    fn render(&self, head: Option<&[u8]>, out: &mut Vec<RawRecord>) {
        let mut payload = head.map(<[u8]>::to_vec).unwrap_or_default();
        EscherNode::Container(self.container.clone()).write(&mut payload);
        out.push(RawRecord::new(MSODRAWING, payload));
        if let Some(obj) = &self.obj {
            out.push(obj.render());
        }
        if let Some((node, txo)) = &self.textbox {
            out.push(RawRecord::new(MSODRAWING, node.to_bytes()));
            out.push(txo.render());
        }
        out.extend(self.trailing.iter().cloned());
    }
}

/// The drawing of one worksheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetDrawing {
    header: EscherNode,
    shapes: Vec<DrawingShape>,
}

impl SheetDrawing {
    /// Empty drawing with a fresh drawing id from `counters`.
    pub fn new(counters: &mut DrawingCounters) -> Self {
        let (drawing_id, patriarch) = counters.add_drawing();
        SheetDrawing {
            header: writer::drawing_header(drawing_id, patriarch),
            shapes: Vec::new(),
        }
    }

    /// Drawing id from the `Dg` atom's instance.
    pub fn drawing_id(&self) -> u16 {
        self.header
            .find(EscherRecordType::Dg)
            .map_or(0, |dg| dg.header().instance)
    }

    pub fn header(&self) -> &EscherNode {
        &self.header
    }

    pub fn shapes(&self) -> &[DrawingShape] {
        &self.shapes
    }

    pub fn shape(&self, shape_id: u32) -> Option<&DrawingShape> {
        self.shapes.iter().find(|s| s.shape_id() == Some(shape_id))
    }

    /// (shape count, last shape id) recorded in the `Dg` atom.
    pub fn dg_counts(&self) -> Option<(u32, u32)> {
        let data = self.header.as_container()?.atom_data(EscherRecordType::Dg)?;
        let csp = u32::from_le_bytes(data.get(0..4)?.try_into().ok()?);
        let spid = u32::from_le_bytes(data.get(4..8)?.try_into().ok()?);
        Some((csp, spid))
    }

    /// Rebuild a drawing from its run of records.
    ///
    /// Fails when the records do not follow the one-shape-per-record layout
    /// (group shapes spread over several records, a missing header); the
    /// caller then keeps the records as they are.
    pub fn parse(records: &[RawRecord], diagnostics: &mut Vec<Diagnostic>) -> XlsResult<Self> {
        let mut warnings = Vec::new();
        let mut iter = records.iter().peekable();

        let first = iter
            .next()
            .filter(|r| r.opcode == MSODRAWING)
            .ok_or_else(|| XlsError::malformed(MSODRAWING, "drawing does not start with MSODRAWING"))?;
        let mut forest = parse_forest(&first.joined(), &mut warnings)?.into_iter();
        let mut header = forest
            .next()
            .filter(|node| node.kind() == EscherRecordType::DgContainer)
            .ok_or_else(|| XlsError::malformed(MSODRAWING, "first drawing record has no DgContainer"))?;

        // The first shape usually shares the header record: move every
        // non-patriarch child of the primary group out of the header.
        let mut pending: Vec<EscherNode> = Vec::new();
        if let Some(group) = header
            .find_mut(EscherRecordType::SpgrContainer)
            .and_then(EscherNode::as_container_mut)
        {
            let patriarch = group.children.len().min(1);
            pending.extend(group.children.drain(patriarch..));
            group.open = true;
        }
        if let Some(root) = header.as_container_mut() {
            root.open = true;
        }
        pending.extend(forest);

        let mut shapes: Vec<DrawingShape> = Vec::new();
        take_shapes(pending, &mut shapes)?;

        while let Some(record) = iter.next() {
            match record.opcode {
                MSODRAWING => {
                    let nodes = parse_forest(&record.joined(), &mut warnings)?;
                    let is_textbox = nodes.len() == 1 && nodes[0].kind() == EscherRecordType::ClientTextbox;
                    if is_textbox {
                        let txo = match iter.next_if(|next| next.opcode == TXO) {
                            Some(next) => Txo::parse(next)?,
                            None => {
                                diagnostics.push(Diagnostic::warn(MSODRAWING, "attached text without TXO"));
                                Txo::new("")
                            },
                        };
                        let shape = shapes
                            .last_mut()
                            .ok_or_else(|| XlsError::malformed(MSODRAWING, "attached text before any shape"))?;
                        shape.textbox = nodes.into_iter().next().map(|node| (node, txo));
                    } else {
                        take_shapes(nodes, &mut shapes)?;
                    }
                },
                OBJ => {
                    let obj = Obj::from_raw(record)?;
                    let shape = shapes
                        .last_mut()
                        .ok_or_else(|| XlsError::malformed(OBJ, "OBJ before any shape"))?;
                    shape.obj = Some(obj);
                },
                BOF => {
                    let shape = shapes
                        .last_mut()
                        .ok_or_else(|| XlsError::malformed(BOF, "embedded substream before any shape"))?;
                    shape.trailing.push(record.clone());
                    let mut depth = 1usize;
                    for inner in iter.by_ref() {
                        shape.trailing.push(inner.clone());
                        match inner.opcode {
                            BOF => depth += 1,
                            EOF => depth -= 1,
                            _ => {},
                        }
                        if depth == 0 {
                            break;
                        }
                    }
                },
                other => {
                    return Err(XlsError::malformed(other, "unexpected record inside the drawing"));
                },
            }
        }

        for warning in warnings {
            diagnostics.push(Diagnostic::warn(MSODRAWING, warning));
        }
        Ok(SheetDrawing { header, shapes })
    }

    /// Counters recorded in this drawing, for workbook registration.
    pub(crate) fn cluster(&self) -> DrawingCluster {
        let (shape_count, last_shape_id) = self.dg_counts().unwrap_or((1, 0));
        let max_id = self
            .shapes
            .iter()
            .filter_map(DrawingShape::shape_id)
            .max()
            .unwrap_or(0);
        DrawingCluster {
            shape_count: shape_count.max(self.shapes.len() as u32 + 1),
            last_shape_id: last_shape_id.max(max_id),
        }
    }

    /// Add a shape; returns its shape id.
    pub fn add_shape(&mut self, counters: &mut DrawingCounters, shape: &NewShape) -> XlsResult<u32> {
        let drawing_id = self.drawing_id();
        let spid = counters.allocate_shape_id(drawing_id)?;
        let with_text = shape.text.is_some();
        let container = writer::shape_container(
            shape.shape_type,
            spid,
            &shape.properties,
            &shape.anchor,
            with_text,
        );
        let textbox = shape
            .text
            .as_deref()
            .map(|text| (writer::client_textbox(), Txo::new(text)));
        self.shapes.push(DrawingShape {
            container,
            obj: Some(Obj::new(shape.object_type, (spid % CLUSTER_SIZE) as u16)),
            textbox,
            trailing: Vec::new(),
        });
        self.update_lengths(counters)?;
        Ok(spid)
    }

    pub fn remove_shape(&mut self, counters: &mut DrawingCounters, shape_id: u32) -> XlsResult<DrawingShape> {
        let position = self
            .shapes
            .iter()
            .position(|s| s.shape_id() == Some(shape_id))
            .ok_or_else(|| XlsError::not_found(format!("shape {shape_id}")))?;
        let removed = self.shapes.remove(position);
        counters.release_shape(self.drawing_id());
        self.update_lengths(counters)?;
        Ok(removed)
    }

    pub fn set_shape_anchor(&mut self, shape_id: u32, anchor: &ClientAnchor) -> XlsResult<()> {
        let shape = self
            .shapes
            .iter_mut()
            .find(|s| s.shape_id() == Some(shape_id))
            .ok_or_else(|| XlsError::not_found(format!("shape {shape_id}")))?;
        shape.set_anchor(anchor);
        Ok(())
    }

    /// Move anchors for rows inserted (`delta > 0`) or deleted at `at`.
    pub(crate) fn shift_rows(&mut self, at: u32, delta: i64) {
        self.shift_anchors(true, at, delta);
    }

    /// Move anchors for columns inserted or deleted at `at`.
    pub(crate) fn shift_cols(&mut self, at: u32, delta: i64) {
        self.shift_anchors(false, at, delta);
    }

    fn shift_anchors(&mut self, rows: bool, at: u32, delta: i64) {
        let max = if rows { 0xFFFF } else { 0xFF };
        for shape in &mut self.shapes {
            let Some(mut anchor) = shape.anchor() else {
                continue;
            };
            let (first, last) = if rows {
                (&mut anchor.row1, &mut anchor.row2)
            } else {
                (&mut anchor.col1, &mut anchor.col2)
            };
            for field in [first, last] {
                let value = i64::from(field.get());
                if value < i64::from(at) {
                    continue;
                }
                // anchors inside a deleted band collapse onto its start
                let moved = if delta < 0 {
                    (value + delta).max(i64::from(at))
                } else {
                    value + delta
                };
                field.set(moved.clamp(0, max) as u16);
            }
            shape.set_anchor(&anchor);
        }
    }

    /// Run the length engine over the header and every shape.
    pub fn update_lengths(&mut self, counters: &DrawingCounters) -> XlsResult<()> {
        let external: u32 = self.shapes.iter_mut().map(DrawingShape::container_bytes).sum();
        let cluster = counters.cluster(self.drawing_id()).unwrap_or_else(|| self.cluster());
        let totals = DrawingTotals {
            external_container_bytes: external,
            shape_count: cluster.shape_count,
            last_shape_id: cluster.last_shape_id,
        };
        escher::update_drawing_header(&mut self.header, &totals)?;
        Ok(())
    }

    /// Records of the drawing in stream order.
    pub fn render(&self) -> Vec<RawRecord> {
        let header = forest_to_bytes(std::slice::from_ref(&self.header));
        let mut out = Vec::new();
        match self.shapes.split_first() {
            None => out.push(RawRecord::new(MSODRAWING, header)),
            Some((first, rest)) => {
                first.render(Some(&header), &mut out);
                for shape in rest {
                    shape.render(None, &mut out);
                }
            },
        }
        out
    }
}

/// Move closed shape containers into `shapes`.
fn take_shapes(nodes: Vec<EscherNode>, shapes: &mut Vec<DrawingShape>) -> XlsResult<()> {
    for node in nodes {
        match node {
            EscherNode::Container(container)
                if container.kind() == EscherRecordType::SpContainer && !container.open =>
            {
                shapes.push(DrawingShape {
                    container,
                    obj: None,
                    textbox: None,
                    trailing: Vec::new(),
                });
            },
            other => {
                return Err(XlsError::malformed(
                    MSODRAWING,
                    format!(
                        "shape record 0x{:04X} spans several drawing records",
                        other.header().record_type
                    ),
                ));
            },
        }
    }
    Ok(())
}
