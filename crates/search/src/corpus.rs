//! Seed knowledge corpus used by the in-memory stores

use crate::retrieval::{Document, Metadata};
use serde_json::{json, Value};

fn doc(id: &str, content: &str, metadata: Value) -> Document {
    Document {
        id: id.to_string(),
        content: content.to_string(),
        metadata: metadata.as_object().cloned().unwrap_or_else(Metadata::new),
    }
}

/// Classical technique notes plus modern synthesis notes in English and Turkish
pub fn seed_documents() -> Vec<Document> {
    vec![
        doc(
            "almuten_001",
            "Almuten Figuris represents the planet with the strongest essential dignity among the significators. It indicates the core life direction and primary planetary influence in the chart.",
            json!({
                "topic": "almuten", "source": "traditional_astrology", "school": "traditional",
                "tradition": "medieval", "language": "en",
                "tags": ["dignity", "significator", "core_identity"],
                "section": 1, "line_start": 1, "line_end": 4
            }),
        ),
        doc(
            "zr_001",
            "Zodiacal Releasing from the Lot of Spirit reveals the timing of career and life direction themes. Peak periods occur when the releasing sign is angular to the Lot of Fortune.",
            json!({
                "topic": "zodiacal_releasing", "source": "hellenistic_timing", "school": "traditional",
                "tradition": "hellenistic", "language": "en",
                "tags": ["timing", "career", "spirit", "fortune"],
                "section": 2, "line_start": 10, "line_end": 14
            }),
        ),
        doc(
            "profection_001",
            "Annual profections activate different houses each year. The profected house and its ruler become the focus of the year's experiences and developments.",
            json!({
                "topic": "profection", "source": "traditional_timing", "school": "traditional",
                "tradition": "hellenistic", "language": "en",
                "tags": ["timing", "houses", "annual", "activation"]
            }),
        ),
        doc(
            "antiscia_001",
            "Antiscia are points of equal light, mirrored around the solstitial axis. They represent hidden connections and equivalences between planets.",
            json!({
                "topic": "antiscia", "source": "traditional_techniques", "school": "traditional",
                "tradition": "medieval", "language": "en",
                "tags": ["antiscia", "solstitial", "hidden", "equivalence"]
            }),
        ),
        doc(
            "dignity_001",
            "Essential dignities show a planet's strength in a sign. Rulership provides the strongest dignity, followed by exaltation, triplicity, term, and face.",
            json!({
                "topic": "dignity", "source": "essential_dignities", "school": "classical",
                "tradition": "medieval", "language": "en",
                "tags": ["dignity", "rulership", "exaltation", "strength"]
            }),
        ),
        doc(
            "sect_001",
            "Sect divides planets into diurnal (Sun, Jupiter, Saturn) and nocturnal (Moon, Venus, Mars) teams. Planets are stronger when in their preferred sect.",
            json!({
                "topic": "sect", "source": "hellenistic_foundations", "school": "traditional",
                "tradition": "hellenistic", "language": "en",
                "tags": ["sect", "diurnal", "nocturnal", "strength"]
            }),
        ),
        doc(
            "firdaria_001",
            "Firdaria are Persian periods that divide life into planetary periods. Each major period is subdivided into minor periods ruled by the same sequence of planets.",
            json!({
                "topic": "firdaria", "source": "persian_periods", "school": "traditional",
                "tradition": "persian", "language": "en",
                "tags": ["firdaria", "persian", "periods", "timing"]
            }),
        ),
        doc(
            "modern_saturn_001",
            "Modern psychological astrology reads a Saturn transit to the Sun as a period of restructuring. According to this interpretation the pressure supports long term growth when commitments are pruned with care.",
            json!({
                "topic": "transit", "source": "modern_synthesis", "school": "modern",
                "tradition": "psychological", "language": "en",
                "tags": ["saturn", "transit", "growth"],
                "source_url": "https://example.org/modern/saturn-transits"
            }),
        ),
        doc(
            "modern_venus_001",
            "In modern relationship astrology Venus in the seventh house highlights partnership as a source of harmony. A difficult square from Mars can bring tension that asks for patience.",
            json!({
                "topic": "synastry", "source": "modern_synthesis", "school": "modern",
                "tradition": "psychological", "language": "en",
                "tags": ["venus", "seventh_house", "relationship"]
            }),
        ),
        doc(
            "modern_moon_001",
            "The Moon sign describes emotional needs and habitual responses. Modern interpretation treats the Moon as the inner child whose comfort patterns shape daily wellbeing.",
            json!({
                "topic": "moon", "source": "modern_synthesis", "school": "modern",
                "tradition": "psychological", "language": "en",
                "tags": ["moon", "emotion", "personality"]
            }),
        ),
        doc(
            "tr_yukselen_001",
            "Yükselen burç kişinin dünyaya açılan kapısıdır. Geleneksel astrolojide yükselenin yöneticisi haritanın genel yönünü ve kişiliği gösterir.",
            json!({
                "topic": "ascendant", "source": "traditional_astrology", "school": "traditional",
                "tradition": "medieval", "language": "tr",
                "tags": ["yükselen", "kişilik", "core_identity"]
            }),
        ),
        doc(
            "tr_profeksiyon_001",
            "Yıllık profeksiyon her yıl bir evi etkinleştirir. O evin yöneticisi yılın efendisi olur ve yılın temalarını belirler.",
            json!({
                "topic": "profection", "source": "traditional_timing", "school": "traditional",
                "tradition": "hellenistic", "language": "tr",
                "tags": ["zamanlama", "profeksiyon", "yıllık"]
            }),
        ),
    ]
}
