use std::sync::{Arc, Mutex};

use flowpage::{snapshot, AllCapabilities, Content, ContentPosition, Grid};
use flowpage_render::{
    page_index_for_position, BoundaryCacheStore, FileBoundaryCacheStore, PaginationDiagnostic,
    PaginationEngine, PaginationError, PaginationOptions, RunConfig, SliceRole,
};

fn paragraphs(count: usize, height: u32) -> String {
    (0..count)
        .map(|i| format!("<p data-outer-height=\"{}\">paragraph {}</p>", height, i))
        .collect()
}

fn article(body: &str) -> Content {
    let xml = format!(
        "<article data-line-height=\"20\" data-outer-width=\"300\">{}</article>",
        body
    );
    let root = snapshot::parse_xhtml(xml.as_bytes()).expect("article snapshot should parse");
    Content::from_node(&root).expect("content should flatten")
}

fn grid(classes: &str, regions: &str) -> Grid {
    let xml = format!(
        "<div class=\"grid {}\" data-outer-width=\"300\" data-outer-height=\"400\" data-line-height=\"20\">{}</div>",
        classes, regions
    );
    let root = snapshot::parse_xhtml(xml.as_bytes()).expect("grid snapshot should parse");
    Grid::from_node(&root).expect("grid should build")
}

const FULL_COLUMN: &str =
    "<div class=\"column\" data-outer-width=\"300\" data-outer-height=\"400\"/>";

fn engine() -> PaginationEngine {
    PaginationEngine::new(PaginationOptions::for_envelope(300.0, 400.0))
}

fn recording_engine() -> (PaginationEngine, Arc<Mutex<Vec<PaginationDiagnostic>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut engine = engine();
    engine.set_diagnostic_sink(move |d| {
        if let Ok(mut seen) = sink.lock() {
            seen.push(d);
        }
    });
    (engine, seen)
}

#[test]
fn short_article_fits_one_page() {
    let content = article(&paragraphs(4, 40));
    let outcome = engine().paginate(&content, &[], RunConfig::default());

    assert!(outcome.complete);
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.pages.len(), 1);
    let page = &outcome.pages[0];
    assert_eq!(page.page_number, 1);
    assert!(page.begin.at_beginning());
    assert_eq!(page.end.block, 4);
    assert_eq!(page.block_count(), 4);
    assert_eq!(page.grid_index, Some(0));
}

#[test]
fn required_figure_waits_for_grid_with_container() {
    let body = format!(
        "{}<figure class=\"required\"><img data-sizes=\"big\" data-minheight=\"100\" src=\"a.png\"/></figure>{}",
        paragraphs(2, 40),
        paragraphs(12, 40)
    );
    let content = article(&body);
    assert_eq!(content.figures.len(), 1);
    assert_eq!(content.figures[0].anchor_index, 2);

    let odd = grid("odd", FULL_COLUMN);
    let even = grid(
        "even",
        "<div class=\"container fixed\" data-sizes=\"big\" data-outer-width=\"300\" data-outer-height=\"200\"/>\
         <div class=\"column\" data-outer-width=\"300\" data-outer-height=\"200\"/>",
    );
    let outcome = engine().paginate(&content, &[odd, even], RunConfig::default());

    assert!(outcome.complete, "{:?}", outcome.error);
    assert_eq!(outcome.pages.len(), 2);

    let first = &outcome.pages[0];
    assert_eq!(first.grid_index, Some(0));
    assert!(first.figures.is_empty());
    assert_eq!(first.end.block, 10);

    let second = &outcome.pages[1];
    assert_eq!(second.grid_index, Some(1));
    assert_eq!(second.figures.len(), 1);
    assert_eq!(second.figures[0].figure_index, 0);
    assert_eq!(second.figures[0].container_index, Some(0));
    assert_eq!(second.figures[0].payload, "<img src=\"a.png\"/>");
    assert_eq!(second.end.block, 14);
}

#[test]
fn optional_figure_without_container_is_dropped() {
    let body = format!(
        "{}<figure><img data-sizes=\"big\" data-minheight=\"100\" src=\"a.png\"/></figure>",
        paragraphs(3, 40)
    );
    let content = article(&body);
    let outcome = engine().paginate(&content, &[], RunConfig::default());

    assert!(outcome.complete);
    assert_eq!(outcome.pages.len(), 1);
    assert!(!outcome.pages[0].forced);
    assert_eq!(outcome.pages[0].dropped_figures, vec![0]);
}

#[test]
fn required_figure_without_container_gets_its_own_page() {
    let body = format!(
        "{}<figure class=\"required\"><img data-sizes=\"big\" data-minheight=\"500\" src=\"a.png\"/></figure>",
        paragraphs(2, 40)
    );
    let content = article(&body);
    let (engine, seen) = recording_engine();
    let outcome = engine.paginate(&content, &[], RunConfig::default());

    assert!(outcome.complete, "{:?}", outcome.error);
    assert_eq!(outcome.pages.len(), 2);
    let forced = &outcome.pages[1];
    assert!(forced.forced);
    assert_eq!(forced.grid_index, None);
    assert_eq!(forced.figures[0].height, 400.0);

    let seen = seen.lock().expect("diagnostics");
    assert!(seen.contains(&PaginationDiagnostic::ForcedFigurePage {
        page_index: 1,
        figure_index: 0,
    }));
}

#[test]
fn figures_taller_than_their_containers_are_never_left_blank() {
    let figure = "<figure class=\"required\"><img data-sizes=\"big\" data-outer-height=\"300\" src=\"a.png\"/></figure>";
    let content = article(&format!("{}{}", figure, figure));
    assert_eq!(content.figures.len(), 2);
    assert_eq!(content.figures[0].sizes[0].1.payload_height(), 300.0);

    let flexible = grid(
        "",
        &format!(
            "<div class=\"container\" data-sizes=\"big\" data-outer-width=\"300\" data-outer-height=\"200\"/>{}",
            FULL_COLUMN
        ),
    );
    let outcome = engine().paginate(&content, &[flexible], RunConfig::default());

    assert!(outcome.complete, "{:?}", outcome.error);
    assert_eq!(outcome.pages.len(), 2);
    for (i, page) in outcome.pages.iter().enumerate() {
        assert!(
            page.block_count() > 0 || !page.figures.is_empty(),
            "page {} is blank",
            i
        );
        assert!(page.forced);
        assert_eq!(page.figures[0].figure_index, i);
        assert_eq!(page.figures[0].height, 300.0);
    }
}

#[test]
fn size_to_container_grid_is_skipped_without_figures() {
    let content = article(&paragraphs(3, 40));
    let sized = grid(
        "sizetocontainer",
        "<div class=\"container\" data-sizes=\"big\" data-outer-width=\"300\" data-outer-height=\"100\"/>\
         <div class=\"column\" data-outer-width=\"300\" data-outer-height=\"300\"/>",
    );
    let plain = grid("", FULL_COLUMN);
    let (engine, seen) = recording_engine();
    let outcome = engine.paginate(&content, &[sized, plain], RunConfig::default());

    assert!(outcome.complete);
    assert_eq!(outcome.pages.len(), 1);
    assert_eq!(outcome.pages[0].grid_index, Some(1));
    assert_eq!(outcome.pages[0].end.block, 3);

    let seen = seen.lock().expect("diagnostics");
    assert!(seen.contains(&PaginationDiagnostic::PageIgnored {
        page_index: 0,
        grid_index: 0,
    }));
}

#[test]
fn tall_paragraph_continues_on_next_page() {
    let content = article(&paragraphs(1, 600));
    let outcome = engine().paginate(&content, &[], RunConfig::default());

    assert!(outcome.complete);
    assert_eq!(outcome.pages.len(), 2);
    assert_eq!(outcome.pages[0].end, ContentPosition::new(0, 0, 200.0));
    assert_eq!(outcome.pages[1].begin, outcome.pages[0].end);

    let slice = &outcome.pages[1].columns[0].slices[0];
    assert_eq!(slice.role, SliceRole::Continued);
    assert_eq!(slice.clip_top, 400.0);
}

#[test]
fn pagination_is_repeatable() {
    let content = article(&paragraphs(25, 40));
    let engine = engine();
    let a = engine.paginate(&content, &[], RunConfig::default());
    let b = engine.paginate(&content, &[], RunConfig::default());
    assert_eq!(a, b);
    assert_eq!(a.pages.len(), 3);

    for pair in a.pages.windows(2) {
        assert_eq!(pair[0].end, pair[1].begin);
        assert!(pair[1].end.greater(&pair[0].end));
    }
}

#[test]
fn page_shorter_than_a_line_is_impossible() {
    let content = article(&paragraphs(2, 40));
    let engine = PaginationEngine::new(PaginationOptions::for_envelope(300.0, 0.0));
    let outcome = engine.paginate(&content, &[], RunConfig::default());

    assert!(!outcome.complete);
    assert!(outcome.pages.is_empty());
    assert!(matches!(
        outcome.error,
        Some(PaginationError::LayoutImpossible { page_index: 0, .. })
    ));
}

#[test]
fn unbounded_line_height_still_paginates() {
    let xml = format!(
        "<article data-line-height=\"inf\" data-outer-width=\"300\">{}</article>",
        paragraphs(4, 40)
    );
    let root = snapshot::parse_xhtml(xml.as_bytes()).expect("article snapshot should parse");
    let content = Content::from_node(&root).expect("content should flatten");
    assert_eq!(content.line_height, 1.0);

    let outcome = engine().paginate(&content, &[], RunConfig::default());
    assert!(outcome.complete, "{:?}", outcome.error);
    assert_eq!(outcome.pages.len(), 1);
    assert_eq!(outcome.pages[0].block_count(), 4);
}

#[test]
fn positions_map_to_pages() {
    let content = article(&paragraphs(15, 40));
    let engine = engine();
    let mut session = engine.begin(&content, &[], RunConfig::default());

    assert_eq!(
        session
            .paginate_until_position(&ContentPosition::new(3, 0, 0.0))
            .expect("paginate"),
        Some(0)
    );
    assert_eq!(session.pages().len(), 1);
    assert_eq!(session.page_index_for_position(&ContentPosition::END), None);

    let outcome = session.finish();
    assert!(outcome.complete);
    assert_eq!(outcome.pages.len(), 2);
    assert_eq!(
        page_index_for_position(&outcome.pages, &ContentPosition::new(12, 0, 0.0), true),
        Some(1)
    );
    assert_eq!(
        page_index_for_position(&outcome.pages, &ContentPosition::END, true),
        Some(1)
    );
}

#[test]
fn file_cache_remembers_boundaries() {
    let root = std::env::temp_dir().join(format!(
        "flowpage-regression-cache-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&root);
    let store = FileBoundaryCacheStore::new(&root);
    let content = article(&paragraphs(15, 40));
    let engine = engine();

    let first = engine.paginate(&content, &[], RunConfig::default().with_cache(&store));
    assert!(first.complete);
    let profile = engine.pagination_profile_id(&content, &[], &AllCapabilities);
    assert!(store.boundaries_path(profile).exists());
    assert_eq!(store.load_boundaries(profile), Some(first.boundaries()));

    let session = engine.begin(&content, &[], RunConfig::default().with_cache(&store));
    assert_eq!(
        session.cached_boundaries(),
        Some(first.boundaries().as_slice())
    );
    let second = session.finish();
    assert_eq!(second, first);

    let _ = std::fs::remove_dir_all(&root);
}
