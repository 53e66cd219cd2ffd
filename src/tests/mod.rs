mod test_cut;
