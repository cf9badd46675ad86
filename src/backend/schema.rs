//! Settings and mappings applied to every new index generation.

use serde_json::{json, Value};

/// Code-aware analysis settings plus the document mapping.
///
/// `content` is tokenized on non-word characters with camel-case splitting,
/// and carries an edge-n-gram sub-field for partial identifiers. `relPath` is
/// analyzed as a path hierarchy for prefix queries. Mapping is not dynamic:
/// fields outside this list are kept in `_source` but not indexed.
pub fn index_schema() -> Value {
    json!({
        "settings": {
            "analysis": {
                "tokenizer": {
                    "code_edge_ngram": {
                        "type": "edge_ngram",
                        "min_gram": 3,
                        "max_gram": 15,
                        "token_chars": ["letter", "digit"]
                    }
                },
                "filter": {
                    "identifier_parts": {
                        "type": "word_delimiter",
                        "generate_word_parts": true,
                        "generate_number_parts": true,
                        "split_on_case_change": true,
                        "split_on_numerics": true,
                        "preserve_original": true
                    }
                },
                "analyzer": {
                    "path_tree": {
                        "tokenizer": "path_hierarchy"
                    },
                    "source_code": {
                        "tokenizer": "pattern",
                        "pattern": "[^A-Za-z0-9_]",
                        "filter": ["identifier_parts", "lowercase", "asciifolding"]
                    },
                    "source_code_ngram": {
                        "tokenizer": "code_edge_ngram",
                        "filter": ["lowercase"]
                    }
                },
                "normalizer": {
                    "lowercase_keyword": {
                        "type": "custom",
                        "filter": ["lowercase"]
                    }
                }
            }
        },
        "mappings": {
            "dynamic": false,
            "properties": {
                "name": {
                    "type": "text",
                    "analyzer": "english",
                    "fields": {
                        "raw": { "type": "keyword", "ignore_above": 256, "normalizer": "lowercase_keyword" }
                    }
                },
                "project": { "type": "keyword", "ignore_above": 256, "normalizer": "lowercase_keyword" },
                "projectPath": { "type": "keyword", "ignore_above": 512 },
                "relPath": {
                    "type": "text",
                    "analyzer": "path_tree",
                    "fields": {
                        "raw": { "type": "keyword", "ignore_above": 512, "normalizer": "lowercase_keyword" }
                    }
                },
                "extension": { "type": "keyword", "normalizer": "lowercase_keyword" },
                "language": { "type": "keyword", "normalizer": "lowercase_keyword" },
                "kind": { "type": "keyword" },
                "isTest": { "type": "boolean" },
                "size": { "type": "long" },
                "updatedAt": { "type": "date", "format": "strict_date_optional_time||epoch_millis" },
                "content": {
                    "type": "text",
                    "analyzer": "source_code",
                    "search_analyzer": "standard",
                    "term_vector": "with_positions_offsets",
                    "fields": {
                        "ngram": { "type": "text", "analyzer": "source_code_ngram" }
                    }
                }
            }
        }
    })
}
