use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use roiscope_core::{FrameProvider, IntensityFrame, Point, StackMetadata};
use roiscope_editor::{load_session, spawn_extraction, EditorError, EditorSession, EditorState};
use roiscope_io::{store, TiffStack};
use tempfile::tempdir;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const WIDTH: u32 = 20;
const HEIGHT: u32 = 12;

fn write_stack(path: &Path, pages: &[u16]) {
    let xml = format!(
        r#"<OME><Image><Pixels DimensionOrder="XYTCZ" Type="uint16" SizeX="{WIDTH}" SizeY="{HEIGHT}" SizeZ="1" SizeC="1" SizeT="{}"><Channel Name="gcamp"/></Pixels></Image></OME>"#,
        pages.len()
    );
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
    let pixels = (WIDTH * HEIGHT) as usize;
    for (i, &value) in pages.iter().enumerate() {
        let mut image = encoder
            .new_image::<colortype::Gray16>(WIDTH, HEIGHT)
            .unwrap();
        if i == 0 {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, xml.as_str())
                .unwrap();
        }
        image.write_data(&vec![value; pixels]).unwrap();
    }
}

const ROIS: &str = r#"{
    "contours": [
        {"label": "0", "vertices": [[1, 1], [4, 1], [4, 4], [1, 4]]},
        {"label": "1", "vertices": [[10, 2], [14, 2], [14, 6], [10, 6]]}
    ]
}"#;

/// Frame provider that takes a while per frame.
struct SlowStack {
    metadata: StackMetadata,
}

impl SlowStack {
    fn new(frames: usize) -> Self {
        Self {
            metadata: StackMetadata {
                frame_count: frames,
                channel_count: 1,
                width: WIDTH as usize,
                height: HEIGHT as usize,
                channel_names: vec!["C0".to_string()],
                ..StackMetadata::default()
            },
        }
    }
}

impl FrameProvider for SlowStack {
    fn metadata(&self) -> &StackMetadata {
        &self.metadata
    }

    fn get_slice(&mut self, _channel: usize, _time: usize) -> roiscope_core::Result<IntensityFrame> {
        thread::sleep(Duration::from_millis(20));
        Ok(IntensityFrame::from_elem(
            (HEIGHT as usize, WIDTH as usize),
            1,
        ))
    }
}

#[test]
fn test_load_edit_save_reload() {
    let dir = tempdir().unwrap();
    let stack_path = dir.path().join("stack.ome.tif");
    let roi_path = dir.path().join("rois.json");
    write_stack(&stack_path, &[100, 200, 300]);
    std::fs::write(&roi_path, ROIS).unwrap();

    let mut session = load_session(&stack_path, &roi_path, 1, 0, 200).unwrap();
    assert_eq!(session.rois().len(), 2);
    assert_eq!(session.roi_path(), Some(roi_path.as_path()));

    let view = session.view_image().unwrap();
    assert_eq!(view.dimensions(), (WIDTH, HEIGHT));
    assert_eq!(view.get_pixel(0, 0).0[0], 255);

    session.start_drawing();
    for p in [(2, 8), (8, 8), (8, 11)] {
        session.add_point(Point::from(p));
    }
    assert_eq!(session.commit_polygon().unwrap().label, "3");
    assert!(session.is_dirty());

    session.click(Point::new(2, 2));
    session.delete_selected().unwrap();
    session.save().unwrap();
    assert!(!session.is_dirty());

    let saved = store::load(&roi_path).unwrap();
    let labels: Vec<_> = saved.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, ["1", "3"]);
    assert_eq!(saved, session.rois());
}

#[test]
fn test_load_rejects_inverted_contrast() {
    let dir = tempdir().unwrap();
    let stack_path = dir.path().join("stack.ome.tif");
    let roi_path = dir.path().join("rois.json");
    write_stack(&stack_path, &[1, 2]);
    std::fs::write(&roi_path, ROIS).unwrap();

    assert!(matches!(
        load_session(&stack_path, &roi_path, 0, 500, 100),
        Err(EditorError::Core(roiscope_core::Error::InvalidBand { .. }))
    ));
    assert!(matches!(
        load_session(&stack_path, dir.path().join("absent.json"), 0, 0, 100),
        Err(EditorError::Io(_))
    ));
}

#[test]
fn test_extraction_from_session_snapshot() {
    let dir = tempdir().unwrap();
    let stack_path = dir.path().join("stack.ome.tif");
    let roi_path = dir.path().join("rois.json");
    write_stack(&stack_path, &[10, 20, 30]);
    std::fs::write(&roi_path, ROIS).unwrap();

    let session = load_session(&stack_path, &roi_path, 0, 0, 30).unwrap();
    let snapshot = session.begin_extraction().unwrap();
    assert!(session.is_extracting());

    let stack = TiffStack::open(&stack_path).unwrap();
    let mut fractions = Vec::new();
    let result = spawn_extraction(stack, snapshot, 0)
        .wait_with_progress(|f, _| fractions.push(f))
        .unwrap();
    assert!(!session.is_extracting());
    assert_relative_eq!(*fractions.last().unwrap(), 1.0);

    assert_eq!(result.labels, ["0", "1"]);
    // 4 x 4 and 5 x 5 pixel squares.
    assert_relative_eq!(result.traces.raw[(0, 0)], 160.0);
    assert_relative_eq!(result.traces.raw[(1, 2)], 750.0);
    assert_relative_eq!(result.traces.normalized[(0, 0)], -0.5);
    assert_relative_eq!(result.traces.normalized[(1, 2)], 0.5);
}

#[test]
fn test_cancelled_extraction_unlocks_session() {
    let mut session = EditorSession::new(
        vec![roiscope_core::Roi::from_vertices(
            "0",
            &[(0, 0), (3, 0), (3, 3), (0, 3)],
        )],
        WIDTH,
        HEIGHT,
    );
    let handle = spawn_extraction(SlowStack::new(200), session.begin_extraction().unwrap(), 0);
    assert!(session.is_extracting());

    session.start_drawing();
    for p in [(5, 5), (9, 5), (9, 9)] {
        session.add_point(Point::from(p));
    }
    assert!(matches!(
        session.commit_polygon(),
        Err(EditorError::ExtractionInProgress)
    ));
    assert_eq!(session.state(), EditorState::DrawingPolygon);

    handle.cancel();
    assert!(matches!(handle.wait(), Err(EditorError::Aborted)));
    assert!(!session.is_extracting());
    assert_eq!(session.commit_polygon().unwrap().label, "2");
}

#[test]
fn test_zoomed_drawing_lands_in_source_coordinates() {
    let mut session = EditorSession::new(Vec::new(), 100, 100).with_view_size(200, 200);
    // View is twice the image size: view (40, 40) is source (20, 20).
    session.begin_zoom_selection(Point::new(40, 40));
    session.update_zoom_selection(Point::new(80, 80));
    session.finish_zoom_selection().unwrap();
    assert_eq!(session.transform().viewport().width(), 20);

    session.start_drawing();
    for p in [(0, 0), (100, 0), (100, 100)] {
        session.add_point(Point::from(p));
    }
    let roi = session.commit_polygon().unwrap();
    assert_eq!(
        roi.contour.points(),
        [Point::new(20, 20), Point::new(30, 20), Point::new(30, 30)]
    );

    session.reset_zoom();
    assert!(!session.is_zoomed());
    assert_eq!(session.hit_test(Point::new(55, 45)), Some(0));
}

#[test]
fn test_save_to_without_roi_file() {
    let dir = tempdir().unwrap();
    let mut session = EditorSession::new(Vec::new(), 10, 10);
    session.start_drawing();
    for p in [(1, 1), (5, 1), (1, 5)] {
        session.add_point(Point::from(p));
    }
    session.commit_polygon().unwrap();
    assert!(matches!(session.save(), Err(EditorError::NoRoiPath)));

    let path = dir.path().join("new.json");
    session.save_to(&path).unwrap();
    assert_eq!(store::load(&path).unwrap(), session.finish());
}
