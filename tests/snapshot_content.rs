use flowpage::{
    snapshot, BreakRecord, CapabilitySet, Content, ContentNode, Error, Grid, SnapshotLimits,
};

const ARTICLE: &str = r#"<article data-line-height="20" data-outer-width="300">
    <h1 itemprop="headline" data-outer-height="40" class="keepwithnext">A headline</h1>
    <p data-outer-height="60" data-margin-bottom="20">First paragraph</p>
    <figure class="required">
        <img data-sizes="one two" data-minheight="120" src="a.png"/>
        <p data-outer-height="20">Caption instead of the image</p>
    </figure>
    <div data-outer-height="80" data-padding-top="20">
        <p data-outer-height="40">Nested</p>
    </div>
</article>"#;

fn content() -> Content {
    let root = snapshot::parse_xhtml(ARTICLE.as_bytes()).expect("article should parse");
    Content::from_node(&root).expect("content should flatten")
}

#[test]
fn snapshot_flattens_into_linked_blocks() {
    let content = content();
    assert_eq!(content.line_height, 20.0);
    assert_eq!(content.col_width, 300.0);
    assert_eq!(content.blocks.len(), 5);

    assert!(content.blocks[0].keep_with_next);
    assert_eq!(content.blocks[0].next_sibling, Some(1));
    assert!(content.blocks[2].is_fallback);
    assert_eq!(content.blocks[2].figure, Some(0));

    let parent = &content.blocks[3];
    assert!(parent.has_children);
    assert_eq!(parent.next_non_child, None);
    assert_eq!(content.blocks[4].parent, Some(3));
    assert_eq!(content.ancestors(4).as_slice(), &[3]);
    assert_eq!(content.next_non_child_index(3), 5);
}

#[test]
fn figure_sizes_and_fields_are_collected() {
    let content = content();
    let figure = &content.figures[0];
    assert!(!figure.optional);
    assert_eq!(figure.anchor_index, 2);
    assert_eq!(figure.fallback, Some(2));
    assert_eq!(figure.size("one").map(|s| s.min_height), Some(120.0));
    assert!(figure.size("two").is_some());
    assert_eq!(content.required_figures().count(), 1);

    assert_eq!(content.fields.get("headline"), Some("A headline"));
}

#[test]
fn fresh_break_record_is_not_at_end() {
    let content = content();
    let mut br = BreakRecord::new();
    assert!(!br.at_end(&content));

    br.index = content.blocks.len();
    assert!(!br.at_end(&content), "required figure still unplaced");
    br.use_figure(0);
    assert!(br.at_end(&content));
}

#[test]
fn json_snapshot_matches_xhtml_geometry() {
    let json = r#"{
        "tag": "article",
        "metrics": {"lineHeight": 20, "outerWidth": 300},
        "children": [
            {"tag": "p", "metrics": {"outerHeight": 40}, "text": "one"},
            {"tag": "p", "metrics": {"outerHeight": 60, "marginTop": 20}, "text": "two"}
        ]
    }"#;
    let node: ContentNode = serde_json::from_str(json).expect("json snapshot should parse");
    let from_json = Content::from_node(&node).expect("content");

    let xml = r#"<article data-line-height="20" data-outer-width="300">
        <p data-outer-height="40">one</p>
        <p data-outer-height="60" data-margin-top="20">two</p>
    </article>"#;
    let from_xml = Content::from_node(&snapshot::parse_xhtml(xml.as_bytes()).expect("parse"))
        .expect("content");

    assert_eq!(from_json.blocks.len(), from_xml.blocks.len());
    for (a, b) in from_json.blocks.iter().zip(&from_xml.blocks) {
        assert_eq!(a.metrics.outer_height, b.metrics.outer_height);
        assert_eq!(a.metrics.margin_top, b.metrics.margin_top);
        assert_eq!(a.first_line, b.first_line);
    }
}

#[test]
fn grid_requirements_filter_by_capabilities() {
    let xml = r#"<div class="grid twocolumns" data-requires="video" data-outer-width="600" data-outer-height="800" data-line-height="20">
        <div class="column" data-outer-width="290" data-outer-height="800"/>
        <div class="column" data-outer-width="290" data-outer-height="800"/>
    </div>"#;
    let grid = Grid::from_node(&snapshot::parse_xhtml(xml.as_bytes()).expect("parse"))
        .expect("grid");
    assert_eq!(grid.columns.len(), 2);
    assert_eq!(grid.col_width, 290.0);
    assert_eq!(grid.text_height, 1600.0);

    assert!(!grid.capability_filter(&CapabilitySet::new()));
    assert!(grid.capability_filter(&CapabilitySet::new().with("video")));
}

#[test]
fn grid_without_regions_is_rejected() {
    let xml = r#"<div class="grid" data-outer-width="600" data-outer-height="800"/>"#;
    let node = snapshot::parse_xhtml(xml.as_bytes()).expect("parse");
    assert!(matches!(
        Grid::from_node(&node),
        Err(Error::InvalidGrid { .. })
    ));
}

#[test]
fn snapshot_depth_is_limited() {
    let xml = b"<article><div><div><p>deep</p></div></div></article>";
    let limits = SnapshotLimits {
        max_depth: 2,
        ..SnapshotLimits::default()
    };
    let err = snapshot::parse_xhtml_with_limits(xml, limits).expect_err("too deep");
    assert!(matches!(
        err,
        Error::Snapshot {
            code: "SNAPSHOT_DEPTH",
            ..
        }
    ));
}
