//! Reading files whose cross-reference data is spread over several
//! sections: incremental updates chained with `/Prev` and hybrid files
//! that add an `/XRefStm` to a classic table.

use pdfobj::{DocId, PdfContext, ReaderOptions};
use std::io::Cursor;

/// Appends `n 0 obj ... endobj` and returns its offset.
fn push_object(out: &mut Vec<u8>, num: u32, body: &[u8]) -> usize {
    let offset = out.len();
    out.extend_from_slice(format!("{num} 0 obj\n").as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\nendobj\n");
    offset
}

fn stream_body(dict: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!("<< {dict} /Length {} >>\nstream\n", data.len()).into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(b"\nendstream");
    body
}

fn entry(offset: usize) -> String {
    format!("{offset:010} 00000 n \n")
}

fn open(ctx: &mut PdfContext, data: Vec<u8>) -> DocId {
    ctx.open_document("test.pdf", Cursor::new(data), &ReaderOptions::default())
        .unwrap()
}

fn read_string(ctx: &mut PdfContext, doc: DocId, num: u32) -> Option<Vec<u8>> {
    let obj = ctx.get_object(doc, num, 0).unwrap().unwrap();
    let value = ctx.string_value(obj).ok().map(<[u8]>::to_vec);
    ctx.release(obj).unwrap();
    value
}

/// Object 2 is replaced and object 3 added by an update section.
fn updated_file() -> Vec<u8> {
    let mut out = b"%PDF-1.4\n".to_vec();
    let catalog = push_object(&mut out, 1, b"<< /Type /Catalog >>");
    let old = push_object(&mut out, 2, b"(old)");
    let first_xref = out.len();
    out.extend_from_slice(b"xref\n0 3\n0000000000 65535 f \n");
    out.extend_from_slice(entry(catalog).as_bytes());
    out.extend_from_slice(entry(old).as_bytes());
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size 3 /Root 1 0 R /ID [<01> <01>] >>\nstartxref\n{first_xref}\n%%EOF\n"
        )
        .as_bytes(),
    );

    let new = push_object(&mut out, 2, b"(new)");
    let added = push_object(&mut out, 3, b"(added)");
    let second_xref = out.len();
    out.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n2 2\n");
    out.extend_from_slice(entry(new).as_bytes());
    out.extend_from_slice(entry(added).as_bytes());
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size 4 /Root 1 0 R /Prev {first_xref} /ID [<01> <02>] >>\nstartxref\n{second_xref}\n%%EOF\n"
        )
        .as_bytes(),
    );
    out
}

/// Classic table for objects 1, 2 and 4; object 3 is listed as free there
/// and lives in object stream 2 according to the xref stream (object 4).
fn hybrid_file(xref_stm: Option<usize>) -> Vec<u8> {
    let mut out = b"%PDF-1.5\n".to_vec();
    let catalog = push_object(&mut out, 1, b"<< /Type /Catalog >>");
    let objstm = push_object(
        &mut out,
        2,
        &stream_body("/Type /ObjStm /N 1 /First 4", b"3 0 (hello)"),
    );
    let xref_stream = push_object(
        &mut out,
        4,
        &stream_body("/Type /XRef /Size 5 /W [1 1 1] /Index [3 1]", &[2, 2, 0]),
    );

    let table = out.len();
    out.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
    out.extend_from_slice(entry(catalog).as_bytes());
    out.extend_from_slice(entry(objstm).as_bytes());
    out.extend_from_slice(b"0000000000 00000 f \n");
    out.extend_from_slice(entry(xref_stream).as_bytes());
    let xref_stm = xref_stm.unwrap_or(xref_stream);
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size 5 /Root 1 0 R /XRefStm {xref_stm} >>\nstartxref\n{table}\n%%EOF\n"
        )
        .as_bytes(),
    );
    out
}

#[test]
fn test_update_section_replaces_and_adds_objects() {
    let mut ctx: PdfContext = PdfContext::new();
    let doc = open(&mut ctx, updated_file());

    assert_eq!(read_string(&mut ctx, doc, 2), Some(b"new".to_vec()));
    assert_eq!(read_string(&mut ctx, doc, 3), Some(b"added".to_vec()));

    // Only the base section describes the catalog
    let catalog = ctx.document_catalog(doc).unwrap();
    let kind = ctx.dict_get(catalog, "Type").unwrap().unwrap();
    assert_eq!(ctx.name_value(kind).unwrap(), b"Catalog");
    ctx.release(catalog).unwrap();

    ctx.close_document(doc).unwrap();
    assert_eq!(ctx.live_objects(), 0);
}

#[test]
fn test_newest_trailer_is_authoritative() {
    let mut ctx: PdfContext = PdfContext::new();
    let doc = open(&mut ctx, updated_file());

    let trailer = ctx.document_trailer(doc).unwrap();
    let size = ctx.dict_get(trailer, "Size").unwrap().unwrap();
    assert_eq!(ctx.number_value(size).unwrap(), 4.0);
    let id = ctx.dict_get(trailer, "ID").unwrap().unwrap();
    let second = ctx.array_get(id, -1).unwrap().unwrap();
    assert_eq!(ctx.string_value(second).unwrap(), &[0x02]);
    ctx.release(trailer).unwrap();
}

#[test]
fn test_hybrid_stream_fills_entry_free_in_table() {
    let mut ctx: PdfContext = PdfContext::new();
    let doc = open(&mut ctx, hybrid_file(None));

    assert_eq!(read_string(&mut ctx, doc, 3), Some(b"hello".to_vec()));
    let catalog = ctx.get_object(doc, 1, 0).unwrap().unwrap();
    assert!(ctx.dict_contains(catalog, "Type").unwrap());
    ctx.release(catalog).unwrap();

    ctx.close_document(doc).unwrap();
    assert_eq!(ctx.live_objects(), 0);
}

#[test]
fn test_broken_xref_stm_is_skipped() {
    // Points at the catalog, which is not a stream
    let data = hybrid_file(Some(9));
    let mut ctx: PdfContext = PdfContext::new();
    let doc = open(&mut ctx, data);

    let catalog = ctx.document_catalog(doc).unwrap();
    let kind = ctx.dict_get(catalog, "Type").unwrap().unwrap();
    assert_eq!(ctx.name_value(kind).unwrap(), b"Catalog");
    ctx.release(catalog).unwrap();

    // Table entries still work; object 3 stays free
    let objstm = ctx.get_object(doc, 2, 0).unwrap().unwrap();
    assert_eq!(ctx.stream_data(objstm).unwrap(), b"3 0 (hello)");
    ctx.release(objstm).unwrap();
    assert_eq!(read_string(&mut ctx, doc, 3), None);

    let beyond = hybrid_file(Some(1 << 20));
    let other = ctx
        .open_document("beyond.pdf", Cursor::new(beyond), &ReaderOptions::default())
        .unwrap();
    assert_eq!(read_string(&mut ctx, other, 3), None);
}
