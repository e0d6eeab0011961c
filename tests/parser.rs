use pretty_assertions::assert_eq;

use xmlkit::{Attribute, EventCollector, ParserBuilder, QName, RecordedEvent};

fn collect(xml: &str) -> Vec<RecordedEvent> {
    let mut parser = ParserBuilder::new().build_from_str(xml).unwrap();
    let mut collector = EventCollector::default();
    parser.parse(&mut collector).unwrap();
    collector.events
}

#[test]
fn start_document_and_end_document_bracket_every_event() {
    let events = collect("<root/>");
    assert_eq!(events.first(), Some(&RecordedEvent::StartDocument));
    assert_eq!(events.last(), Some(&RecordedEvent::EndDocument));
}

#[test]
fn self_closing_tag_emits_matched_start_and_end() {
    let events = collect("<root/>");
    assert_eq!(
        events,
        vec![
            RecordedEvent::StartDocument,
            RecordedEvent::StartElement {
                name: QName::new("root"),
                attributes: vec![],
            },
            RecordedEvent::EndElement { name: QName::new("root") },
            RecordedEvent::EndDocument,
        ]
    );
}

#[test]
fn xml_declaration_is_reported_before_anything_else() {
    let events = collect("<?xml version=\"1.1\" encoding=\"utf-8\" standalone=\"yes\"?><root/>");
    assert_eq!(
        events[1],
        RecordedEvent::XmlDeclaration {
            version: "1.1".to_string(),
            encoding: Some("utf-8".to_string()),
            standalone: Some(true),
        }
    );
}

#[test]
fn nested_elements_and_text_round_trip_in_order() {
    let events = collect("<a><b>hi</b><c/></a>");
    assert_eq!(
        events,
        vec![
            RecordedEvent::StartDocument,
            RecordedEvent::StartElement { name: QName::new("a"), attributes: vec![] },
            RecordedEvent::StartElement { name: QName::new("b"), attributes: vec![] },
            RecordedEvent::Characters("hi".to_string()),
            RecordedEvent::EndElement { name: QName::new("b") },
            RecordedEvent::StartElement { name: QName::new("c"), attributes: vec![] },
            RecordedEvent::EndElement { name: QName::new("c") },
            RecordedEvent::EndElement { name: QName::new("a") },
            RecordedEvent::EndDocument,
        ]
    );
}

#[test]
fn attributes_are_reported_as_specified() {
    let events = collect(r#"<root a="1" b="two"/>"#);
    match &events[1] {
        RecordedEvent::StartElement { name, attributes } => {
            assert_eq!(name, &QName::new("root"));
            assert_eq!(
                attributes,
                &vec![
                    Attribute::specified(QName::new("a"), "1"),
                    Attribute::specified(QName::new("b"), "two"),
                ]
            );
        }
        other => panic!("expected StartElement, got {:?}", other),
    }
}

#[test]
fn duplicate_attribute_is_malformed() {
    let err = ParserBuilder::new()
        .build_from_str(r#"<root a="1" a="2"/>"#)
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("duplicate attribute"));
}

#[test]
fn mismatched_end_tag_is_rejected_by_default() {
    let err = ParserBuilder::new()
        .build_from_str("<a></b>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("mismatched tags"));
}

#[test]
fn check_end_names_false_tolerates_mismatched_closing_tag() {
    let events = {
        let mut parser = ParserBuilder::new().check_end_names(false).build_from_str("<a></b>").unwrap();
        let mut collector = EventCollector::default();
        parser.parse(&mut collector).unwrap();
        collector.events
    };
    assert_eq!(events[1], RecordedEvent::StartElement { name: QName::new("a"), attributes: vec![] });
    assert_eq!(events[2], RecordedEvent::EndElement { name: QName::new("a") });
}

#[test]
fn predefined_entities_expand_in_content_and_attributes() {
    let events = collect(r#"<root attr="a &amp; b">x &lt; y</root>"#);
    match &events[1] {
        RecordedEvent::StartElement { attributes, .. } => {
            assert_eq!(attributes[0].value, "a & b");
        }
        other => panic!("expected StartElement, got {:?}", other),
    }
    assert_eq!(events[2], RecordedEvent::Characters("x < y".to_string()));
}

#[test]
fn numeric_character_references_expand() {
    let events = collect("<root>&#65;&#x42;</root>");
    assert_eq!(events[2], RecordedEvent::Characters("AB".to_string()));
}

#[test]
fn unresolvable_custom_entity_in_content_is_skipped_not_fatal() {
    let events = collect("<root>&undefined;</root>");
    assert!(events.contains(&RecordedEvent::SkippedEntity("undefined".to_string())));
}

#[test]
fn unresolvable_custom_entity_in_attribute_is_a_hard_error() {
    let err = ParserBuilder::new()
        .build_from_str(r#"<root a="&undefined;"/>"#)
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("invalid entity reference"));
}

#[test]
fn bare_ampersand_in_attribute_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str(r#"<root a="x & y"/>"#)
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("unescaped"));
}

#[test]
fn bare_cdata_close_sequence_outside_cdata_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str("<root>a]]>b</root>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("invalid XML character"));
}

#[test]
fn cdata_section_reports_bracketed_events_and_raw_text() {
    let events = collect("<root><![CDATA[<not a tag>]]></root>");
    assert_eq!(
        events[2..5],
        [
            RecordedEvent::StartCData,
            RecordedEvent::Characters("<not a tag>".to_string()),
            RecordedEvent::EndCData,
        ]
    );
}

#[test]
fn comment_text_is_reported_verbatim() {
    let events = collect("<root><!-- a comment --></root>");
    assert_eq!(events[2], RecordedEvent::Comment(" a comment ".to_string()));
}

#[test]
fn comment_with_double_dash_is_rejected_when_validating() {
    let err = ParserBuilder::new()
        .check_comments(true)
        .build_from_str("<root><!-- a -- b --></root>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("comment contains"));
}

#[test]
fn processing_instruction_outside_and_inside_root_is_reported() {
    let events = collect("<?pi-target some data?><root/>");
    assert_eq!(
        events[1],
        RecordedEvent::ProcessingInstruction {
            target: "pi-target".to_string(),
            data: "some data".to_string(),
        }
    );
}

#[test]
fn xml_target_processing_instruction_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str("<root><?xml bogus?></root>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("processing instruction target"));
}

#[test]
fn text_outside_root_element_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str("stray text<root/>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("outside the root element"));
}

#[test]
fn whitespace_outside_root_element_is_tolerated() {
    let events = collect("  \n<root/>\n  ");
    assert_eq!(
        events,
        vec![
            RecordedEvent::StartDocument,
            RecordedEvent::IgnorableWhitespace("  \n".to_string()),
            RecordedEvent::StartElement { name: QName::new("root"), attributes: vec![] },
            RecordedEvent::EndElement { name: QName::new("root") },
            RecordedEvent::IgnorableWhitespace("\n  ".to_string()),
            RecordedEvent::EndDocument,
        ]
    );
}

#[test]
fn second_root_element_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str("<a/><b/>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("more than one root"));
}

#[test]
fn unclosed_element_at_eof_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str("<root><child></root>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("mismatched tags"));
}

#[test]
fn document_with_no_root_element_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str("   ")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("no root element"));
}

#[test]
fn xml_space_preserve_suppresses_trimming_and_whitespace_collapsing() {
    let events = {
        let mut parser = ParserBuilder::new().trim_text_start(true).trim_text_end(true).build_from_str(
            r#"<root xml:space="preserve">  padded  </root>"#,
        ).unwrap();
        let mut collector = EventCollector::default();
        parser.parse(&mut collector).unwrap();
        collector.events
    };
    assert!(events.contains(&RecordedEvent::Characters("  padded  ".to_string())));
}

#[test]
fn trim_text_start_and_end_trim_mixed_content_without_preserve() {
    let events = {
        let mut parser = ParserBuilder::new().trim_text_start(true).trim_text_end(true).build_from_str("<root>  hi  </root>").unwrap();
        let mut collector = EventCollector::default();
        parser.parse(&mut collector).unwrap();
        collector.events
    };
    assert!(events.contains(&RecordedEvent::Characters("hi".to_string())));
}

#[test]
fn doctype_reports_start_dtd_internal_subset_and_end_dtd_in_order() {
    let events = collect("<!DOCTYPE root [<!ENTITY foo \"bar\">]><root>&foo;</root>");
    assert_eq!(events[1], RecordedEvent::StartDtd { name: "root".to_string(), public_id: None, system_id: None });
    assert!(matches!(events[2], RecordedEvent::InternalSubset(_)));
    assert_eq!(events[3], RecordedEvent::EndDtd);
    assert_eq!(events[5], RecordedEvent::Characters("bar".to_string()));
}

#[test]
fn internal_dtd_general_entity_expands_in_content() {
    let events = collect("<!DOCTYPE root [<!ENTITY greeting \"hello\">]><root>&greeting;, world</root>");
    assert!(events.contains(&RecordedEvent::Characters("hello, world".to_string())));
}

#[test]
fn recursive_entity_definition_is_rejected() {
    let err = ParserBuilder::new()
        .build_from_str("<!DOCTYPE root [<!ENTITY a \"&b;\"><!ENTITY b \"&a;\">]><root>&a;</root>")
        .unwrap()
        .parse(&mut EventCollector::default())
        .unwrap_err();
    assert!(err.to_string().contains("recursive entity"));
}

#[test]
fn notation_and_unparsed_entity_declarations_are_reported() {
    let events = collect(
        "<!DOCTYPE root [<!NOTATION png SYSTEM \"image/png\"><!ENTITY logo SYSTEM \"logo.png\" NDATA png>]><root/>",
    );
    assert!(events.iter().any(|e| matches!(e, RecordedEvent::NotationDecl { name, .. } if name == "png")));
    assert!(events.iter().any(|e| matches!(
        e,
        RecordedEvent::UnparsedEntityDecl { name, notation_name, .. }
            if name == "logo" && notation_name == "png"
    )));
}

#[test]
fn default_namespace_applies_to_unqualified_descendant_elements() {
    let events = collect(r#"<root xmlns="urn:example"><child/></root>"#);
    // Namespace resolution itself is exercised in `name.rs`'s unit tests;
    // here we just confirm the declaring attribute still surfaces normally.
    match &events[1] {
        RecordedEvent::StartElement { attributes, .. } => {
            assert_eq!(attributes[0].value, "urn:example");
        }
        other => panic!("expected StartElement, got {:?}", other),
    }
}

#[test]
fn parse_from_str_and_parse_from_file_produce_identical_events() {
    let xml = "<root a=\"1\"><child>text</child></root>";
    let from_str = collect(xml);

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("doc.xml");
    std::fs::write(&path, xml).unwrap();
    let mut parser = ParserBuilder::new().build_from_file(&path).unwrap();
    let mut collector = EventCollector::default();
    parser.parse(&mut collector).unwrap();

    assert_eq!(from_str, collector.events);
}
