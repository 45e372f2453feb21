//! Reader for the cascade files OpenCV ships (`haarcascade_*.xml`).
//!
//! Both layouts found in the wild are accepted:
//! - the `opencv-cascade-classifier` layout written by `opencv_traincascade`,
//!   with a shared feature table under `features`
//! - the older `opencv-haar-classifier` layout written by
//!   `opencv_haartraining`, where every tree node carries its own feature
//!
//! Only upright HAAR stumps map onto [`CascadeModel`]. LBP/HOG cascades and
//! deeper trees are refused.

use std::str::FromStr;

use roxmltree::{Document, Node};

use crate::err::{OsrError, OsrResult};
use crate::vision::cascade::{CascadeModel, HaarFeature, Stage, WeakClassifier, WeightedRect};

fn invalid<T>(msg: String) -> OsrResult<T> {
    Err(OsrError::InvalidCascade(msg))
}

fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn required<'a, 'i>(node: Node<'a, 'i>, name: &str) -> OsrResult<Node<'a, 'i>> {
    match child(node, name) {
        Some(c) => Ok(c),
        None => invalid(format!(
            "<{}> is missing <{}>",
            node.tag_name().name(),
            name
        )),
    }
}

/// Sequence entries, OpenCV writes them as `<_>` elements
fn items<'a, 'i: 'a>(node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children()
        .filter(|c| c.is_element() && c.tag_name().name() == "_")
}

fn numbers<T: FromStr>(node: Node) -> OsrResult<Vec<T>> {
    let text = node.text().unwrap_or_default();

    text.split_whitespace()
        .map(|tok| {
            tok.parse::<T>().map_err(|_| {
                OsrError::InvalidCascade(format!(
                    "<{}> holds a bad number {:?}",
                    node.tag_name().name(),
                    tok
                ))
            })
        })
        .collect()
}

fn number<T: FromStr>(node: Node, name: &str) -> OsrResult<T> {
    let n = required(node, name)?;
    match numbers::<T>(n)?.pop() {
        Some(v) => Ok(v),
        None => invalid(format!("<{}> is empty", name)),
    }
}

fn flag(node: Node, name: &str) -> OsrResult<bool> {
    match child(node, name) {
        Some(_) => Ok(number::<i32>(node, name)? != 0),
        None => Ok(false),
    }
}

fn rect(node: Node) -> OsrResult<WeightedRect> {
    let v = numbers::<f32>(node)?;
    if v.len() != 5 || v[..4].iter().any(|c| *c < 0.0 || c.fract() != 0.0) {
        return invalid(format!("bad rect {:?}", node.text().unwrap_or_default().trim()));
    }

    Ok(WeightedRect {
        x: v[0] as u32,
        y: v[1] as u32,
        width: v[2] as u32,
        height: v[3] as u32,
        weight: v[4],
    })
}

fn feature(node: Node) -> OsrResult<HaarFeature> {
    let rects = items(required(node, "rects")?)
        .map(rect)
        .collect::<OsrResult<Vec<_>>>()?;

    Ok(HaarFeature {
        rects,
        tilted: flag(node, "tilted")?,
    })
}

/// Leaf index of a stump child, OpenCV stores leaves as `-index`
fn leaf(idx: i32) -> OsrResult<usize> {
    if idx > 0 {
        return invalid("only stump cascades are supported, found a deeper tree".to_owned());
    }
    Ok((-idx) as usize)
}

fn traincascade_weak(node: Node, feature_count: usize) -> OsrResult<WeakClassifier> {
    let internal = numbers::<f32>(required(node, "internalNodes")?)?;
    let leaves = numbers::<f32>(required(node, "leafValues")?)?;

    if internal.len() != 4 {
        return invalid(format!(
            "weak classifier has {} internal node values, a stump has 4",
            internal.len()
        ));
    }

    let left = leaf(internal[0] as i32)?;
    let right = leaf(internal[1] as i32)?;
    let feature = internal[2] as i64;

    if feature < 0 || feature as usize >= feature_count {
        return invalid(format!("weak classifier references missing feature {}", feature));
    }

    match (leaves.get(left), leaves.get(right)) {
        (Some(l), Some(r)) => Ok(WeakClassifier {
            feature: feature as usize,
            threshold: internal[3],
            left: *l,
            right: *r,
        }),
        _ => invalid(format!("weak classifier has {} leaf values", leaves.len())),
    }
}

fn traincascade(cascade: Node) -> OsrResult<CascadeModel> {
    if let Some(kind) = child(cascade, "featureType") {
        let kind = kind.text().unwrap_or_default().trim();
        if !kind.eq_ignore_ascii_case("HAAR") {
            return invalid(format!("{} features are not supported", kind));
        }
    }

    let features = items(required(cascade, "features")?)
        .map(feature)
        .collect::<OsrResult<Vec<_>>>()?;

    let stages = items(required(cascade, "stages")?)
        .map(|stage| -> OsrResult<Stage> {
            let weak_classifiers = items(required(stage, "weakClassifiers")?)
                .map(|wc| traincascade_weak(wc, features.len()))
                .collect::<OsrResult<Vec<_>>>()?;

            Ok(Stage {
                threshold: number(stage, "stageThreshold")?,
                weak_classifiers,
            })
        })
        .collect::<OsrResult<Vec<_>>>()?;

    Ok(CascadeModel {
        window_width: number(cascade, "width")?,
        window_height: number(cascade, "height")?,
        stages,
        features,
    })
}

fn haartraining(cascade: Node) -> OsrResult<CascadeModel> {
    let size = numbers::<u32>(required(cascade, "size")?)?;
    if size.len() != 2 {
        return invalid(format!("<size> holds {} values", size.len()));
    }

    let mut features = Vec::new();
    let mut stages = Vec::new();

    for stage in items(required(cascade, "stages")?) {
        let mut weak_classifiers = Vec::new();

        for tree in items(required(stage, "trees")?) {
            let mut nodes = items(tree);

            let node = match (nodes.next(), nodes.next()) {
                (Some(n), None) => n,
                _ => {
                    return invalid(
                        "only stump cascades are supported, found a deeper tree".to_owned(),
                    )
                }
            };

            if child(node, "left_node").is_some() || child(node, "right_node").is_some() {
                return invalid("only stump cascades are supported, found a deeper tree".to_owned());
            }

            features.push(feature(required(node, "feature")?)?);
            weak_classifiers.push(WeakClassifier {
                feature: features.len() - 1,
                threshold: number(node, "threshold")?,
                left: number(node, "left_val")?,
                right: number(node, "right_val")?,
            });
        }

        stages.push(Stage {
            threshold: number(stage, "stage_threshold")?,
            weak_classifiers,
        });
    }

    Ok(CascadeModel {
        window_width: size[0],
        window_height: size[1],
        stages,
        features,
    })
}

/// Parses an `<opencv_storage>` document holding one stump cascade
pub fn parse_cascade(xml: &str) -> OsrResult<CascadeModel> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    if root.tag_name().name() != "opencv_storage" {
        return invalid(format!(
            "expected <opencv_storage>, found <{}>",
            root.tag_name().name()
        ));
    }

    let cascade = match root.children().find(|c| c.is_element()) {
        Some(c) => c,
        None => return invalid("<opencv_storage> is empty".to_owned()),
    };

    if child(cascade, "features").is_some() {
        traincascade(cascade)
    } else if child(cascade, "size").is_some() {
        haartraining(cascade)
    } else {
        invalid(format!(
            "<{}> is neither a traincascade nor a haartraining cascade",
            cascade.tag_name().name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trimmed from haarcascade_frontalface_default.xml
    const TRAINCASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageParams>
    <maxWeakCount>2</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>2</maxWeakCount>
      <stageThreshold>-5.0425500869750977e+00</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 -3.1511999666690826e-02</internalNodes>
          <leafValues>
            2.0875380039215088e+00 -2.2172100543975830e+00</leafValues></_>
        <_>
          <internalNodes>
            0 -1 1 1.2396000325679779e-02</internalNodes>
          <leafValues>
            -1.8633940219879150e+00 1.3272049427032471e+00</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          6 4 12 9 -1.</_>
        <_>
          6 7 12 3 3.</_></rects></_>
    <_>
      <rects>
        <_>
          6 4 12 7 -1.</_>
        <_>
          10 4 4 7 3.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    // Trimmed from haarcascade_mcs_mouth.xml
    const HAARTRAINING: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<haarcascade_mcs_mouth type_id="opencv-haar-classifier">
  <size>25 15</size>
  <stages>
    <_>
      <!-- stage 0 -->
      <trees>
        <_>
          <!-- tree 0 -->
          <_>
            <!-- root node -->
            <feature>
              <rects>
                <_>0 0 14 9 -1.</_>
                <_>0 3 14 3 3.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>-0.1192855015397072</threshold>
            <left_val>0.7854182124137878</left_val>
            <right_val>-0.4541360139846802</right_val></_></_></trees>
      <stage_threshold>-1.4530290365219116</stage_threshold>
      <parent>-1</parent>
      <next>-1</next></_></stages></haarcascade_mcs_mouth>
</opencv_storage>
"#;

    #[test]
    fn test_reads_traincascade_layout() {
        let model = parse_cascade(TRAINCASCADE).unwrap();
        model.validate().unwrap();

        assert_eq!((model.window_width, model.window_height), (24, 24));
        assert_eq!(model.stages.len(), 1);
        assert!((model.stages[0].threshold + 5.04255).abs() < 1e-4);

        let wc = &model.stages[0].weak_classifiers[1];
        assert_eq!(wc.feature, 1);
        assert!((wc.threshold - 0.012396).abs() < 1e-6);
        assert!((wc.left + 1.863394).abs() < 1e-5);
        assert!((wc.right - 1.327205).abs() < 1e-5);

        let r = &model.features[1].rects[1];
        assert_eq!((r.x, r.y, r.width, r.height), (10, 4, 4, 7));
        assert_eq!(r.weight, 3.0);
        assert!(!model.features[0].tilted);
    }

    #[test]
    fn test_reads_haartraining_layout() {
        let model = parse_cascade(HAARTRAINING).unwrap();
        model.validate().unwrap();

        assert_eq!((model.window_width, model.window_height), (25, 15));
        assert_eq!(model.features.len(), 1);
        assert_eq!(model.features[0].rects[0].weight, -1.0);

        let wc = &model.stages[0].weak_classifiers[0];
        assert_eq!(wc.feature, 0);
        assert!((wc.left - 0.785418).abs() < 1e-5);
        assert!((model.stages[0].threshold + 1.453029).abs() < 1e-5);
    }

    #[test]
    fn test_refuses_lbp_cascade() {
        let lbp = TRAINCASCADE.replace("<featureType>HAAR", "<featureType>LBP");
        assert!(matches!(parse_cascade(&lbp), Err(OsrError::InvalidCascade(_))));
    }

    #[test]
    fn test_refuses_deeper_trees() {
        let deep = TRAINCASCADE.replacen("0 -1 0 -3.15", "1 -1 0 -3.15", 1);
        assert!(matches!(parse_cascade(&deep), Err(OsrError::InvalidCascade(_))));

        let split = TRAINCASCADE.replacen("0 -1 0 -3.15", "0 -1 0 -3.15 0 -2 1 0.5", 1);
        assert!(matches!(parse_cascade(&split), Err(OsrError::InvalidCascade(_))));
    }

    #[test]
    fn test_tilted_feature_is_kept_for_validation() {
        let tilted = HAARTRAINING.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        let model = parse_cascade(&tilted).unwrap();

        assert!(model.features[0].tilted);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_refuses_foreign_documents() {
        assert!(matches!(parse_cascade("<svg></svg>"), Err(OsrError::InvalidCascade(_))));
        assert!(matches!(parse_cascade("<opencv_storage>"), Err(OsrError::Xml(_))));
    }
}
