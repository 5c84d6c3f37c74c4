use serde::Deserialize;

/// `?limit=&offset=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl Pagination {
    /// Clamps requested values into `(limit, offset)`.
    pub fn resolve(&self, params: &PageParams) -> (i64, i64) {
        let limit = match params.limit {
            Some(limit) if limit > 0 => limit.min(self.max_limit),
            _ => self.default_limit,
        };
        let offset = params.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let pagination = Pagination::default();
        assert_eq!(pagination.resolve(&PageParams::default()), (50, 0));
        assert_eq!(
            pagination.resolve(&PageParams {
                limit: Some(1000),
                offset: Some(-3),
            }),
            (500, 0)
        );
        assert_eq!(
            pagination.resolve(&PageParams {
                limit: Some(0),
                offset: Some(20),
            }),
            (50, 20)
        );
    }
}
